//! Georeferenced single-band rasters.
//!
//! Forecast grids are written as Float32 GeoTIFFs: a north-up grid with a
//! fixed origin and square pixels, tagged with ModelPixelScale,
//! ModelTiepoint, a GeoKey directory carrying the EPSG code, and the
//! GDAL_NODATA tag so GDAL tooling reads the same nodata value we do.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use thiserror::Error;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{TiffEncoder, colortype};
use tiff::tags::Tag;

use crate::config::RasterConfig;

#[derive(Error, Debug)]
pub enum RasterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("not a georeferenced raster: {0}")]
    MissingGeoreference(String),

    #[error("unsupported sample format in {0}")]
    UnsupportedFormat(String),

    #[error("data length {got} does not match {rows}x{cols} grid")]
    ShapeMismatch { rows: usize, cols: usize, got: usize },
}

// GeoTIFF key ids and values.
const GT_MODEL_TYPE: u16 = 1024;
const GT_RASTER_TYPE: u16 = 1025;
const PROJECTED_CS_TYPE: u16 = 3072;
const MODEL_TYPE_PROJECTED: u16 = 1;
const RASTER_PIXEL_IS_AREA: u16 = 1;

// ---------------------------------------------------------------------------
// Grid geometry
// ---------------------------------------------------------------------------

/// North-up regular grid: `origin` is the top-left corner of pixel (0, 0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSpec {
    pub origin_x: f64,
    pub origin_y: f64,
    pub resolution: f64,
    pub cols: usize,
    pub rows: usize,
}

impl GridSpec {
    /// Grid covering the configured extent grown by the margin on every side.
    pub fn from_config(config: &RasterConfig) -> Self {
        let e = &config.extent;
        let xmin = e.xmin - config.margin;
        let xmax = e.xmax + config.margin;
        let ymin = e.ymin - config.margin;
        let ymax = e.ymax + config.margin;
        Self {
            origin_x: xmin,
            origin_y: ymax,
            resolution: config.resolution,
            cols: ((xmax - xmin) / config.resolution).ceil() as usize,
            rows: ((ymax - ymin) / config.resolution).ceil() as usize,
        }
    }

    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Planar coordinate of a pixel centre.
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.resolution,
            self.origin_y - (row as f64 + 0.5) * self.resolution,
        )
    }

    /// Pixel containing a planar coordinate, or `None` outside the grid.
    pub fn pixel_at(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let col = ((x - self.origin_x) / self.resolution).floor();
        let row = ((self.origin_y - y) / self.resolution).floor();
        if !col.is_finite() || !row.is_finite() || col < 0.0 || row < 0.0 {
            return None;
        }
        let (row, col) = (row as usize, col as usize);
        (row < self.rows && col < self.cols).then_some((row, col))
    }
}

// ---------------------------------------------------------------------------
// Raster
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub grid: GridSpec,
    pub nodata: f32,
    pub epsg: Option<u16>,
    /// Row-major, `grid.rows * grid.cols` values.
    pub data: Vec<f32>,
}

impl Raster {
    /// A raster filled with nodata.
    pub fn empty(grid: GridSpec, nodata: f32, epsg: Option<u16>) -> Self {
        Self {
            grid,
            nodata,
            epsg,
            data: vec![nodata; grid.len()],
        }
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        let v = *self.data.get(row * self.grid.cols + col)?;
        (!v.is_nan() && v != self.nodata).then_some(v)
    }

    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        let idx = row * self.grid.cols + col;
        if let Some(slot) = self.data.get_mut(idx) {
            *slot = value;
        }
    }

    /// Number of pixels holding data.
    pub fn valid_count(&self) -> usize {
        self.data
            .iter()
            .filter(|v| !v.is_nan() && **v != self.nodata)
            .count()
    }
}

pub fn write_geotiff(path: &Path, raster: &Raster) -> Result<(), RasterError> {
    let grid = &raster.grid;
    if raster.data.len() != grid.len() {
        return Err(RasterError::ShapeMismatch {
            rows: grid.rows,
            cols: grid.cols,
            got: raster.data.len(),
        });
    }

    let file = BufWriter::new(File::create(path)?);
    let mut encoder = TiffEncoder::new(file)?;
    let mut image = encoder.new_image::<colortype::Gray32Float>(grid.cols as u32, grid.rows as u32)?;

    let scale = [grid.resolution, grid.resolution, 0.0];
    let tiepoint = [0.0, 0.0, 0.0, grid.origin_x, grid.origin_y, 0.0];
    let mut keys: Vec<u16> = vec![
        1, 1, 0, 0, // header, key count patched below
        GT_MODEL_TYPE, 0, 1, MODEL_TYPE_PROJECTED,
        GT_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA,
    ];
    if let Some(epsg) = raster.epsg {
        keys.extend_from_slice(&[PROJECTED_CS_TYPE, 0, 1, epsg]);
    }
    keys[3] = (keys.len() / 4 - 1) as u16;
    let nodata = raster.nodata.to_string();

    image.encoder().write_tag(Tag::ModelPixelScaleTag, &scale[..])?;
    image.encoder().write_tag(Tag::ModelTiepointTag, &tiepoint[..])?;
    image.encoder().write_tag(Tag::GeoKeyDirectoryTag, &keys[..])?;
    image.encoder().write_tag(Tag::GdalNodata, nodata.as_str())?;
    image.write_data(&raster.data)?;
    Ok(())
}

pub fn read_geotiff(path: &Path) -> Result<Raster, RasterError> {
    let name = path.display().to_string();
    let mut decoder = Decoder::new(BufReader::new(File::open(path)?))?;
    let (cols, rows) = decoder.dimensions()?;

    let scale = decoder
        .get_tag_f64_vec(Tag::ModelPixelScaleTag)
        .map_err(|_| RasterError::MissingGeoreference(name.clone()))?;
    let tiepoint = decoder
        .get_tag_f64_vec(Tag::ModelTiepointTag)
        .map_err(|_| RasterError::MissingGeoreference(name.clone()))?;
    if scale.len() < 2 || tiepoint.len() < 6 {
        return Err(RasterError::MissingGeoreference(name));
    }
    let nodata = decoder
        .get_tag_ascii_string(Tag::GdalNodata)
        .ok()
        .and_then(|s| s.trim_matches(char::from(0)).trim().parse::<f32>().ok())
        .unwrap_or(f32::NAN);
    let epsg = decoder
        .get_tag_u16_vec(Tag::GeoKeyDirectoryTag)
        .ok()
        .and_then(|keys| {
            keys.chunks_exact(4)
                .skip(1)
                .find(|k| k[0] == PROJECTED_CS_TYPE && k[1] == 0)
                .map(|k| k[3])
        });

    let data = match decoder.read_image()? {
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        _ => return Err(RasterError::UnsupportedFormat(name)),
    };

    let grid = GridSpec {
        // Tie point maps raster (i, j) to model (x, y).
        origin_x: tiepoint[3] - tiepoint[0] * scale[0],
        origin_y: tiepoint[4] + tiepoint[1] * scale[1],
        resolution: scale[0],
        cols: cols as usize,
        rows: rows as usize,
    };
    if data.len() != grid.len() {
        return Err(RasterError::ShapeMismatch {
            rows: grid.rows,
            cols: grid.cols,
            got: data.len(),
        });
    }
    Ok(Raster {
        grid,
        nodata,
        epsg,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Extent;

    fn grid() -> GridSpec {
        GridSpec {
            origin_x: 1000.0,
            origin_y: 5000.0,
            resolution: 100.0,
            cols: 4,
            rows: 3,
        }
    }

    #[test]
    fn test_grid_from_config_adds_margin_and_rounds_up() {
        let config = RasterConfig {
            extent: Extent {
                xmin: 0.0,
                ymin: 0.0,
                xmax: 10_500.0,
                ymax: 4_000.0,
            },
            margin: 500.0,
            resolution: 1000.0,
            ..RasterConfig::default()
        };
        let g = GridSpec::from_config(&config);
        assert_eq!((g.origin_x, g.origin_y), (-500.0, 4500.0));
        assert_eq!(g.cols, 12, "11.5 km wide rounds up");
        assert_eq!(g.rows, 5);
    }

    #[test]
    fn test_default_canterbury_grid_dimensions() {
        let g = GridSpec::from_config(&RasterConfig::default());
        assert_eq!(g.cols, 379);
        assert_eq!(g.rows, 368);
    }

    #[test]
    fn test_pixel_lookup_matches_pixel_centre() {
        let g = grid();
        let (x, y) = g.pixel_center(2, 3);
        assert_eq!((x, y), (1350.0, 4750.0));
        assert_eq!(g.pixel_at(x, y), Some((2, 3)));
        assert_eq!(g.pixel_at(999.0, 4900.0), None);
        assert_eq!(g.pixel_at(1100.0, 5001.0), None);
        assert_eq!(g.pixel_at(1400.0, 4900.0), None, "right edge is exclusive");
    }

    #[test]
    fn test_geotiff_round_trip_keeps_georeference_and_nodata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1h_20190101_0100_20190101_0000.tif");
        let mut raster = Raster::empty(grid(), -9999.0, Some(2193));
        raster.set(0, 0, 1.25);
        raster.set(2, 3, 0.0);
        write_geotiff(&path, &raster).unwrap();

        let back = read_geotiff(&path).unwrap();
        assert_eq!(back.grid, raster.grid);
        assert_eq!(back.epsg, Some(2193));
        assert_eq!(back.nodata, -9999.0);
        assert_eq!(back.get(0, 0), Some(1.25));
        assert_eq!(back.get(2, 3), Some(0.0));
        assert_eq!(back.get(1, 1), None);
        assert_eq!(back.valid_count(), 2);
    }

    #[test]
    fn test_write_rejects_wrong_data_length() {
        let dir = tempfile::tempdir().unwrap();
        let mut raster = Raster::empty(grid(), -9999.0, None);
        raster.data.pop();
        let result = write_geotiff(&dir.path().join("bad.tif"), &raster);
        assert!(matches!(result, Err(RasterError::ShapeMismatch { .. })));
    }
}
