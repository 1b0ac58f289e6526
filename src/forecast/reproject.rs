use proj4rs::Proj;

use super::ForecastError;

/// Transforms source grid coordinates into the output planar system.
pub struct Reprojector {
    src: Proj,
    dst: Proj,
    src_geographic: bool,
    dst_geographic: bool,
}

fn is_geographic(definition: &str) -> bool {
    definition.contains("+proj=longlat") || definition.contains("+proj=latlong")
}

impl Reprojector {
    pub fn new(source_crs: &str, target_crs: &str) -> Result<Self, ForecastError> {
        let parse = |definition: &str| {
            Proj::from_proj_string(definition)
                .map_err(|e| ForecastError::Projection(format!("'{}': {}", definition, e)))
        };
        Ok(Self {
            src: parse(source_crs)?,
            dst: parse(target_crs)?,
            src_geographic: is_geographic(source_crs),
            dst_geographic: is_geographic(target_crs),
        })
    }

    /// Projects one `(lon, lat)` pair given in degrees.
    pub fn project(&self, lon: f64, lat: f64) -> Result<(f64, f64), ForecastError> {
        let mut coord = if self.src_geographic {
            (lon.to_radians(), lat.to_radians(), 0f64)
        } else {
            (lon, lat, 0f64)
        };
        proj4rs::transform::transform(&self.src, &self.dst, &mut coord)
            .map_err(|e| ForecastError::Projection(format!("({}, {}): {}", lon, lat, e)))?;
        if self.dst_geographic {
            Ok((coord.0.to_degrees(), coord.1.to_degrees()))
        } else {
            Ok((coord.0, coord.1))
        }
    }

    /// Projects a whole coordinate set. Points that fail to project come
    /// back as NaN so the interpolator can leave their triangles out.
    pub fn project_all(&self, lon: &[f64], lat: &[f64]) -> Vec<(f64, f64)> {
        lon.iter()
            .zip(lat)
            .map(|(&x, &y)| {
                if !x.is_finite() || !y.is_finite() {
                    return (f64::NAN, f64::NAN);
                }
                self.project(x, y).unwrap_or((f64::NAN, f64::NAN))
            })
            .collect()
    }
}
