//! Z-buffered triangle rasterization.
//!
//! Triangles are projected once, then each horizontal band of the frame is
//! filled independently, either on the calling thread or on the rayon pool.
//! Band boundaries do not change which fragments win the depth test, so both
//! backends produce identical frames.

use image::{Rgb, Rgb32FImage, RgbImage};
use nalgebra::{Matrix4, Vector2, Vector3, Vector4};
use rayon::prelude::*;
use viewscore_core::{RasterBackend, RenderMode};

use crate::camera::OrbitCamera;
use crate::mesh::{sample_texture, Mesh};

/// Rows per parallel band.
const BAND_ROWS: usize = 16;

const AMBIENT: f32 = 0.3;

#[derive(Debug, Clone, Copy)]
struct Attr {
    color: [f32; 4],
    normal: Vector3<f32>,
    uv: [f32; 2],
}

struct ScreenTri {
    xy: [Vector2<f32>; 3],
    inv_w: [f32; 3],
    attrs: [Attr; 3],
    material: usize,
    area: f32,
    min: Vector2<f32>,
    max: Vector2<f32>,
}

/// Everything a draw call reads.
pub struct Rasterizer<'a> {
    pub mesh: &'a Mesh,
    pub mode: RenderMode,
    pub envmap: Option<&'a Rgb32FImage>,
    pub background: [u8; 3],
    pub backend: RasterBackend,
}

impl Rasterizer<'_> {
    pub fn draw(&self, camera: &OrbitCamera, width: u32, height: u32) -> RgbImage {
        let (w, h) = (width as usize, height as usize);
        if w == 0 || h == 0 {
            return RgbImage::new(width, height);
        }
        let view_proj = camera.view_projection(width as f32 / height as f32);
        let light = camera.eye().coords.try_normalize(1e-12).unwrap_or_else(Vector3::z);
        let tris = self.project(&view_proj, w, h);

        let mut color = vec![0f32; w * h * 3];
        let mut depth = vec![f32::INFINITY; w * h];

        match self.backend {
            RasterBackend::Serial => {
                for (band, (c, d)) in color
                    .chunks_mut(BAND_ROWS * w * 3)
                    .zip(depth.chunks_mut(BAND_ROWS * w))
                    .enumerate()
                {
                    self.fill_band(&tris, &light, band * BAND_ROWS, w, c, d);
                }
            }
            RasterBackend::Parallel => {
                color
                    .par_chunks_mut(BAND_ROWS * w * 3)
                    .zip(depth.par_chunks_mut(BAND_ROWS * w))
                    .enumerate()
                    .for_each(|(band, (c, d))| {
                        self.fill_band(&tris, &light, band * BAND_ROWS, w, c, d);
                    });
            }
        }

        if self.mode == RenderMode::Depth {
            shade_depth(&mut color, &depth);
        }
        self.resolve(width, height, &color, &depth)
    }

    fn project(&self, view_proj: &Matrix4<f32>, w: usize, h: usize) -> Vec<ScreenTri> {
        let mesh = self.mesh;
        let clip: Vec<Vector4<f32>> = mesh
            .positions
            .iter()
            .map(|p| view_proj * Vector4::new(p.x, p.y, p.z, 1.0))
            .collect();

        let mut tris = Vec::with_capacity(mesh.triangles.len());
        for tri in &mesh.triangles {
            let idx = tri.indices.map(|i| i as usize);
            // Behind or on the near plane; the camera sits outside the
            // normalised asset so this only drops degenerate cases.
            if idx.iter().any(|&i| clip[i].w <= 1e-6) {
                continue;
            }

            let xy = idx.map(|i| {
                let c = clip[i];
                Vector2::new(
                    (c.x / c.w * 0.5 + 0.5) * w as f32,
                    (0.5 - c.y / c.w * 0.5) * h as f32,
                )
            });
            let area = edge(xy[0], xy[1], xy[2]);
            if area.abs() < 1e-8 {
                continue;
            }

            let attrs = idx.map(|i| Attr {
                color: mesh.colors.get(i).copied().unwrap_or([1.0; 4]),
                normal: mesh.normals.get(i).copied().unwrap_or_else(Vector3::y),
                uv: mesh.uvs.get(i).copied().unwrap_or([0.0, 0.0]),
            });

            tris.push(ScreenTri {
                xy,
                inv_w: idx.map(|i| 1.0 / clip[i].w),
                attrs,
                material: tri.material,
                area,
                min: xy[0].inf(&xy[1]).inf(&xy[2]),
                max: xy[0].sup(&xy[1]).sup(&xy[2]),
            });
        }
        tris
    }

    /// Fill rows `y0 .. y0 + depth.len() / w`.
    fn fill_band(
        &self,
        tris: &[ScreenTri],
        light: &Vector3<f32>,
        y0: usize,
        w: usize,
        color: &mut [f32],
        depth: &mut [f32],
    ) {
        let rows = depth.len() / w;
        let y1 = y0 + rows;

        for tri in tris {
            let ty0 = (tri.min.y.floor().max(y0 as f32)) as usize;
            let ty1 = (tri.max.y.ceil().min(y1 as f32)) as usize;
            let tx0 = tri.min.x.floor().max(0.0) as usize;
            let tx1 = (tri.max.x.ceil().min(w as f32)) as usize;
            if ty0 >= ty1 || tx0 >= tx1 {
                continue;
            }

            let inv_area = 1.0 / tri.area;
            for y in ty0..ty1 {
                for x in tx0..tx1 {
                    let p = Vector2::new(x as f32 + 0.5, y as f32 + 0.5);
                    let b = [
                        edge(tri.xy[1], tri.xy[2], p) * inv_area,
                        edge(tri.xy[2], tri.xy[0], p) * inv_area,
                        edge(tri.xy[0], tri.xy[1], p) * inv_area,
                    ];
                    // Dividing by the signed area makes the test winding-agnostic.
                    if b.iter().any(|&v| v < 0.0) {
                        continue;
                    }

                    let persp = [b[0] * tri.inv_w[0], b[1] * tri.inv_w[1], b[2] * tri.inv_w[2]];
                    let sum = persp[0] + persp[1] + persp[2];
                    if sum <= 0.0 {
                        continue;
                    }
                    let z = 1.0 / sum;

                    let i = (y - y0) * w + x;
                    if z >= depth[i] {
                        continue;
                    }
                    depth[i] = z;

                    let weights = persp.map(|v| v / sum);
                    let rgb = self.shade(tri, &weights, light);
                    color[i * 3..i * 3 + 3].copy_from_slice(&rgb);
                }
            }
        }
    }

    fn shade(&self, tri: &ScreenTri, weights: &[f32; 3], light: &Vector3<f32>) -> [f32; 3] {
        let a = &tri.attrs;
        let mut normal = (a[0].normal * weights[0] + a[1].normal * weights[1] + a[2].normal * weights[2])
            .try_normalize(1e-12)
            .unwrap_or_else(Vector3::y);

        if self.mode == RenderMode::Normal {
            return [normal.x, normal.y, normal.z].map(|v| v * 0.5 + 0.5);
        }
        if self.mode == RenderMode::Depth {
            // Replaced after the depth range is known.
            return [0.0; 3];
        }

        let albedo = self.albedo(tri, weights);
        // Double-sided: light the side facing the camera.
        if normal.dot(light) < 0.0 {
            normal = -normal;
        }

        match self.mode {
            RenderMode::Lambertian => {
                let k = AMBIENT + (1.0 - AMBIENT) * normal.dot(light).max(0.0);
                albedo.map(|c| c * k)
            }
            RenderMode::Pbr => {
                let env = self
                    .envmap
                    .map(|map| sample_envmap(map, &normal))
                    .unwrap_or([1.0; 3]);
                [albedo[0] * env[0], albedo[1] * env[1], albedo[2] * env[2]]
            }
            _ => albedo,
        }
    }

    fn albedo(&self, tri: &ScreenTri, weights: &[f32; 3]) -> [f32; 3] {
        let a = &tri.attrs;
        let mut rgb = [0f32; 3];
        for (c, out) in rgb.iter_mut().enumerate() {
            *out = a[0].color[c] * weights[0] + a[1].color[c] * weights[1] + a[2].color[c] * weights[2];
        }

        let Some(material) = self.mesh.materials.get(tri.material) else {
            return rgb;
        };
        let tex = material.texture.as_ref().map(|t| {
            let uv = [
                a[0].uv[0] * weights[0] + a[1].uv[0] * weights[1] + a[2].uv[0] * weights[2],
                a[0].uv[1] * weights[0] + a[1].uv[1] * weights[1] + a[2].uv[1] * weights[2],
            ];
            sample_texture(t, uv)
        });

        for (c, out) in rgb.iter_mut().enumerate() {
            *out *= material.base_color[c];
            if let Some(t) = tex {
                *out *= t[c];
            }
        }
        rgb
    }

    fn resolve(&self, width: u32, height: u32, color: &[f32], depth: &[f32]) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let i = y as usize * width as usize + x as usize;
            if depth[i].is_infinite() {
                return Rgb(self.background);
            }
            Rgb([0, 1, 2].map(|c| (color[i * 3 + c].clamp(0.0, 1.0) * 255.0).round() as u8))
        })
    }
}

/// Map covered pixels' view depth to gray, near = white.
fn shade_depth(color: &mut [f32], depth: &[f32]) {
    let (lo, hi) = depth
        .iter()
        .filter(|d| d.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &d| (lo.min(d), hi.max(d)));
    if !lo.is_finite() {
        return;
    }
    let span = (hi - lo).max(1e-6);
    for (i, d) in depth.iter().enumerate() {
        if d.is_finite() {
            let g = 1.0 - (d - lo) / span;
            color[i * 3..i * 3 + 3].fill(g);
        }
    }
}

/// Equirectangular lookup along `dir`.
fn sample_envmap(map: &Rgb32FImage, dir: &Vector3<f32>) -> [f32; 3] {
    use std::f32::consts::PI;

    let (w, h) = map.dimensions();
    if w == 0 || h == 0 {
        return [1.0; 3];
    }
    let u = 0.5 + dir.x.atan2(dir.z) / (2.0 * PI);
    let v = dir.y.clamp(-1.0, 1.0).acos() / PI;
    let x = ((u * w as f32) as u32).min(w - 1);
    let y = ((v * h as f32) as u32).min(h - 1);
    map.get_pixel(x, y).0
}

fn edge(a: Vector2<f32>, b: Vector2<f32>, p: Vector2<f32>) -> f32 {
    (p.x - a.x) * (b.y - a.y) - (p.y - a.y) * (b.x - a.x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::tests::quad;
    use viewscore_core::Pose;

    fn draw(mesh: &Mesh, mode: RenderMode, backend: RasterBackend, pose: Pose) -> RgbImage {
        let mut camera = OrbitCamera::new(3.0, 50.0);
        camera.pose = pose;
        Rasterizer {
            mesh,
            mode,
            envmap: None,
            background: [255, 255, 255],
            backend,
        }
        .draw(&camera, 64, 48)
    }

    #[test]
    fn albedo_quad_covers_centre_with_base_colour() {
        let mesh = quad([1.0, 0.0, 0.0, 1.0]);
        let img = draw(&mesh, RenderMode::Albedo, RasterBackend::Serial, Pose::new(0.0, 0.0));
        assert_eq!(*img.get_pixel(32, 24), Rgb([255, 0, 0]));
        assert_eq!(*img.get_pixel(0, 0), Rgb([255, 255, 255]));
    }

    #[test]
    fn backends_agree() {
        let mesh = quad([0.2, 0.7, 0.4, 1.0]);
        for mode in [RenderMode::Albedo, RenderMode::Lambertian, RenderMode::Normal, RenderMode::Depth] {
            let pose = Pose::new(-20.0, 30.0);
            let a = draw(&mesh, mode, RasterBackend::Serial, pose);
            let b = draw(&mesh, mode, RasterBackend::Parallel, pose);
            assert_eq!(a, b, "{mode:?}");
        }
    }

    #[test]
    fn back_side_is_visible() {
        let mesh = quad([0.0, 0.0, 1.0, 1.0]);
        let img = draw(&mesh, RenderMode::Albedo, RasterBackend::Serial, Pose::new(0.0, 180.0));
        assert_eq!(*img.get_pixel(32, 24), Rgb([0, 0, 255]));
    }

    #[test]
    fn normal_mode_encodes_facing_normal() {
        let mesh = quad([1.0; 4]);
        let img = draw(&mesh, RenderMode::Normal, RasterBackend::Serial, Pose::new(0.0, 0.0));
        assert_eq!(*img.get_pixel(32, 24), Rgb([128, 128, 255]));
    }

    #[test]
    fn lambertian_head_on_is_full_albedo() {
        let mesh = quad([0.5, 0.5, 0.5, 1.0]);
        let img = draw(&mesh, RenderMode::Lambertian, RasterBackend::Serial, Pose::new(0.0, 0.0));
        let v = img.get_pixel(32, 24)[0];
        assert!((126..=128).contains(&v), "got {v}");
    }

    #[test]
    fn edge_on_quad_draws_nothing() {
        let mesh = quad([1.0, 0.0, 0.0, 1.0]);
        let img = draw(&mesh, RenderMode::Albedo, RasterBackend::Serial, Pose::new(0.0, 90.0));
        assert!(img.pixels().all(|p| *p == Rgb([255, 255, 255])));
    }
}
