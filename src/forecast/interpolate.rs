/// Linear interpolation of a structured source grid onto the output raster.
///
/// Every source cell quad `(j, i)..(j+1, i+1)` is split into two triangles.
/// An output pixel whose centre falls inside a triangle gets the barycentric
/// blend of the three vertex values; pixels no triangle covers stay nodata.
/// The geometry depends only on the projected coordinates, so the pixel
/// stencils are computed once per file and applied to every lead hour.

use crate::raster::{GridSpec, Raster};

const DEGENERATE_AREA: f64 = 1e-12;
const EDGE_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
struct Stencil {
    pixel: usize,
    vertices: [usize; 3],
    weights: [f64; 3],
}

#[derive(Debug, Clone)]
pub struct TriangleMesh {
    grid: GridSpec,
    point_count: usize,
    stencils: Vec<Stencil>,
}

impl TriangleMesh {
    /// `points` are the projected source coordinates in row-major
    /// `rows x cols` order. Triangles with a non-finite vertex are left out.
    pub fn new(points: &[(f64, f64)], rows: usize, cols: usize, grid: GridSpec) -> Self {
        let mut stencils = Vec::new();
        if rows >= 2 && cols >= 2 && points.len() >= rows * cols {
            for j in 0..rows - 1 {
                for i in 0..cols - 1 {
                    let a = j * cols + i;
                    let (b, c, d) = (a + 1, a + cols, a + cols + 1);
                    for tri in [[a, b, d], [a, d, c]] {
                        cover_triangle(&grid, points, tri, &mut stencils);
                    }
                }
            }
        }
        Self {
            grid,
            point_count: rows * cols,
            stencils,
        }
    }

    /// Number of (pixel, triangle) assignments; zero means the source grid
    /// does not overlap the output extent at all.
    pub fn coverage(&self) -> usize {
        self.stencils.len()
    }

    /// Interpolates one layer of source values onto the output grid.
    pub fn interpolate(&self, values: &[f64], nodata: f32, epsg: Option<u16>) -> Raster {
        let mut raster = Raster::empty(self.grid, nodata, epsg);
        if values.len() < self.point_count {
            return raster;
        }
        for s in &self.stencils {
            let v = [values[s.vertices[0]], values[s.vertices[1]], values[s.vertices[2]]];
            if v.iter().all(|x| x.is_finite()) {
                let blended = v[0] * s.weights[0] + v[1] * s.weights[1] + v[2] * s.weights[2];
                raster.data[s.pixel] = blended as f32;
            }
        }
        raster
    }
}

fn cover_triangle(grid: &GridSpec, points: &[(f64, f64)], tri: [usize; 3], out: &mut Vec<Stencil>) {
    let [(x0, y0), (x1, y1), (x2, y2)] = tri.map(|k| points[k]);
    if ![x0, y0, x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
        return;
    }
    let det = (y1 - y2) * (x0 - x2) + (x2 - x1) * (y0 - y2);
    if det.abs() < DEGENERATE_AREA {
        return;
    }

    // Pixel index ranges whose centres can fall inside the bounding box
    let res = grid.resolution;
    let (xmin, xmax) = (x0.min(x1).min(x2), x0.max(x1).max(x2));
    let (ymin, ymax) = (y0.min(y1).min(y2), y0.max(y1).max(y2));
    let col_lo = (((xmin - grid.origin_x) / res) - 0.5).ceil().max(0.0) as i64;
    let col_hi = (((xmax - grid.origin_x) / res) - 0.5).floor().min(grid.cols as f64 - 1.0) as i64;
    let row_lo = (((grid.origin_y - ymax) / res) - 0.5).ceil().max(0.0) as i64;
    let row_hi = (((grid.origin_y - ymin) / res) - 0.5).floor().min(grid.rows as f64 - 1.0) as i64;

    for row in row_lo..=row_hi {
        for col in col_lo..=col_hi {
            let (x, y) = grid.pixel_center(row as usize, col as usize);
            let w0 = ((y1 - y2) * (x - x2) + (x2 - x1) * (y - y2)) / det;
            let w1 = ((y2 - y0) * (x - x2) + (x0 - x2) * (y - y2)) / det;
            let w2 = 1.0 - w0 - w1;
            if w0 >= -EDGE_TOLERANCE && w1 >= -EDGE_TOLERANCE && w2 >= -EDGE_TOLERANCE {
                out.push(Stencil {
                    pixel: row as usize * grid.cols + col as usize,
                    vertices: tri,
                    weights: [w0, w1, w2],
                });
            }
        }
    }
}
