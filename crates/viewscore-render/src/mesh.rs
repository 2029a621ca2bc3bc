//! Triangle meshes: loading, normalisation, orientation.

use std::fs::File;
use std::path::Path;

use anyhow::{bail, Context, Result};
use image::{Rgba, RgbaImage};
use nalgebra::{Matrix3, Matrix4, Point3, Rotation3, Vector3};
use tracing::{debug, warn};
use viewscore_core::FrontDir;

/// Surface appearance of a group of triangles.
#[derive(Debug, Clone)]
pub struct Material {
    /// Linear multiplier applied to vertex colour and texture
    pub base_color: [f32; 4],
    pub texture: Option<RgbaImage>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            base_color: [0.8, 0.8, 0.8, 1.0],
            texture: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triangle {
    pub indices: [u32; 3],
    pub material: usize,
}

/// Indexed triangle mesh. `uvs` and `colors` are either empty or one per
/// vertex; `normals` is always one per vertex once loaded.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub positions: Vec<Vector3<f32>>,
    pub normals: Vec<Vector3<f32>>,
    pub uvs: Vec<[f32; 2]>,
    pub colors: Vec<[f32; 4]>,
    pub triangles: Vec<Triangle>,
    pub materials: Vec<Material>,
}

impl Mesh {
    /// Load by extension: `.obj`, `.glb`, `.gltf`, `.stl`.
    pub fn load(path: &Path) -> Result<Self> {
        let ext = extension(path);
        let mut mesh = match ext.as_str() {
            "obj" => load_obj(path)?,
            "glb" | "gltf" => load_gltf(path)?,
            "stl" => load_stl(path)?,
            other => bail!("Unsupported mesh format '.{}': {}", other, path.display()),
        };

        if mesh.triangles.is_empty() {
            bail!("Mesh {} contains no triangles", path.display());
        }
        if mesh.normals.len() != mesh.positions.len() {
            mesh.compute_normals();
        }
        if mesh.materials.is_empty() {
            mesh.materials.push(Material::default());
        }

        debug!(
            path = %path.display(),
            vertices = mesh.positions.len(),
            triangles = mesh.triangles.len(),
            materials = mesh.materials.len(),
            "Loaded mesh"
        );
        Ok(mesh)
    }

    /// Area-weighted vertex normals.
    pub fn compute_normals(&mut self) {
        let mut normals = vec![Vector3::zeros(); self.positions.len()];
        for tri in &self.triangles {
            let [a, b, c] = tri.indices.map(|i| i as usize);
            let n = (self.positions[b] - self.positions[a])
                .cross(&(self.positions[c] - self.positions[a]));
            for i in [a, b, c] {
                normals[i] += n;
            }
        }
        self.normals = normals
            .into_iter()
            .map(|n| n.try_normalize(1e-12).unwrap_or_else(Vector3::y))
            .collect();
    }

    /// Axis-aligned bounds, `None` when empty.
    pub fn bounds(&self) -> Option<(Vector3<f32>, Vector3<f32>)> {
        let first = *self.positions.first()?;
        Some(self.positions.iter().fold((first, first), |(lo, hi), p| {
            (lo.inf(p), hi.sup(p))
        }))
    }

    /// Centre on the origin and scale uniformly so the largest half-extent
    /// equals `bound`.
    pub fn normalize(&mut self, bound: f32) {
        let Some((lo, hi)) = self.bounds() else {
            return;
        };
        let center = (lo + hi) * 0.5;
        let half = ((hi - lo) * 0.5).max();
        let scale = if half > 0.0 { bound / half } else { 1.0 };
        for p in &mut self.positions {
            *p = (*p - center) * scale;
        }
    }

    /// Rotate so the declared front direction faces +z.
    pub fn orient(&mut self, front: FrontDir) {
        let rotation = front_rotation(front);
        for p in &mut self.positions {
            *p = rotation * *p;
        }
        for n in &mut self.normals {
            *n = rotation * *n;
        }
    }
}

/// Extensions [`Mesh::load`] understands.
pub const MESH_EXTENSIONS: &[&str] = &["obj", "glb", "gltf", "stl"];

pub(crate) fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

fn front_rotation(front: FrontDir) -> Rotation3<f32> {
    use std::f32::consts::{FRAC_PI_2, PI};
    match front {
        FrontDir::PosZ => Rotation3::identity(),
        FrontDir::NegZ => Rotation3::from_axis_angle(&Vector3::y_axis(), PI),
        FrontDir::PosX => Rotation3::from_axis_angle(&Vector3::y_axis(), -FRAC_PI_2),
        FrontDir::NegX => Rotation3::from_axis_angle(&Vector3::y_axis(), FRAC_PI_2),
        FrontDir::PosY => Rotation3::from_axis_angle(&Vector3::x_axis(), FRAC_PI_2),
        FrontDir::NegY => Rotation3::from_axis_angle(&Vector3::x_axis(), -FRAC_PI_2),
    }
}

fn load_stl(path: &Path) -> Result<Mesh> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open STL file: {}", path.display()))?;
    let stl = stl_io::read_stl(&mut file).context("Failed to read STL file")?;

    let positions = stl
        .vertices
        .iter()
        .map(|v| Vector3::new(v[0], v[1], v[2]))
        .collect();
    let triangles = stl
        .faces
        .iter()
        .map(|f| Triangle {
            indices: f.vertices.map(|i| i as u32),
            material: 0,
        })
        .collect();

    Ok(Mesh {
        positions,
        triangles,
        ..Mesh::default()
    })
}

fn load_obj(path: &Path) -> Result<Mesh> {
    let options = tobj::LoadOptions {
        triangulate: true,
        single_index: true,
        ..Default::default()
    };
    let (models, materials) = tobj::load_obj(path, &options)
        .with_context(|| format!("Failed to load OBJ file: {}", path.display()))?;
    let materials = materials.unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load OBJ materials, using defaults");
        Vec::new()
    });

    let dir = path.parent().unwrap_or(Path::new(""));
    let mut mesh = Mesh::default();
    mesh.materials.push(Material::default());
    mesh.materials.extend(materials.iter().map(|m| obj_material(m, dir)));

    for model in &models {
        let m = &model.mesh;
        let base = mesh.positions.len();
        let count = m.positions.len() / 3;

        let normals = (m.normals.len() == 3 * count).then(|| {
            m.normals
                .chunks_exact(3)
                .map(|n| {
                    Vector3::new(n[0], n[1], n[2])
                        .try_normalize(1e-12)
                        .unwrap_or_else(Vector3::y)
                })
                .collect::<Vec<_>>()
        });
        // OBJ puts the texture origin bottom-left
        let uvs = (count > 0 && m.texcoords.len() == 2 * count)
            .then(|| m.texcoords.chunks_exact(2).map(|t| [t[0], 1.0 - t[1]]).collect());
        let colors = (count > 0 && m.vertex_color.len() == 3 * count)
            .then(|| m.vertex_color.chunks_exact(3).map(|c| [c[0], c[1], c[2], 1.0]).collect());

        extend_attribute(&mut mesh.uvs, base, count, uvs, [0.0, 0.0]);
        extend_attribute(&mut mesh.colors, base, count, colors, [1.0; 4]);
        match normals {
            Some(ns) if mesh.normals.len() == base => mesh.normals.extend(ns),
            _ => mesh.normals.clear(),
        }
        mesh.positions.extend(
            m.positions
                .chunks_exact(3)
                .map(|p| Vector3::new(p[0], p[1], p[2])),
        );

        let material = match m.material_id {
            Some(id) if id < materials.len() => id + 1,
            _ => 0,
        };
        for tri in m.indices.chunks_exact(3) {
            if tri.iter().any(|&i| i as usize >= count) {
                bail!("OBJ index out of range in '{}' ({} vertices)", model.name, count);
            }
            mesh.triangles.push(Triangle {
                indices: [
                    base as u32 + tri[0],
                    base as u32 + tri[1],
                    base as u32 + tri[2],
                ],
                material,
            });
        }
    }

    Ok(mesh)
}

fn obj_material(material: &tobj::Material, dir: &Path) -> Material {
    let [r, g, b] = material.diffuse.unwrap_or([0.8; 3]);
    let texture = material.diffuse_texture.as_ref().and_then(|name| {
        let path = dir.join(name);
        match image::open(&path) {
            Ok(img) => Some(img.to_rgba8()),
            Err(e) => {
                warn!(texture = %path.display(), error = %e, "Failed to load texture, using base colour only");
                None
            }
        }
    });
    Material {
        base_color: [r, g, b, material.dissolve.unwrap_or(1.0)],
        texture,
    }
}

fn load_gltf(path: &Path) -> Result<Mesh> {
    let (document, buffers, images) =
        gltf::import(path).with_context(|| format!("Failed to load {}", path.display()))?;

    let mut mesh = Mesh::default();
    let mut material_slots = Vec::new();

    let scene = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .context("glTF file has no scene")?;

    let mut stack: Vec<(gltf::Node, Matrix4<f32>)> =
        scene.nodes().map(|n| (n, Matrix4::identity())).collect();

    while let Some((node, parent)) = stack.pop() {
        let world = parent * Matrix4::from(node.transform().matrix());
        for child in node.children() {
            stack.push((child, world));
        }

        let Some(gltf_mesh) = node.mesh() else {
            continue;
        };
        let normal_matrix = world
            .fixed_view::<3, 3>(0, 0)
            .into_owned()
            .try_inverse()
            .map(|m: Matrix3<f32>| m.transpose())
            .unwrap_or_else(Matrix3::identity);

        for primitive in gltf_mesh.primitives() {
            if primitive.mode() != gltf::mesh::Mode::Triangles {
                warn!(mode = ?primitive.mode(), "Skipping non-triangle primitive");
                continue;
            }
            append_primitive(
                &mut mesh,
                &mut material_slots,
                &primitive,
                &buffers,
                &images,
                &world,
                &normal_matrix,
            )?;
        }
    }

    Ok(mesh)
}

fn append_primitive(
    mesh: &mut Mesh,
    material_slots: &mut Vec<Option<usize>>,
    primitive: &gltf::Primitive,
    buffers: &[gltf::buffer::Data],
    images: &[gltf::image::Data],
    world: &Matrix4<f32>,
    normal_matrix: &Matrix3<f32>,
) -> Result<()> {
    let reader = primitive.reader(|buffer| Some(&buffers[buffer.index()]));
    let Some(positions) = reader.read_positions() else {
        warn!("Skipping primitive without positions");
        return Ok(());
    };

    let base = mesh.positions.len();
    let positions: Vec<Vector3<f32>> = positions
        .map(|p| {
            world
                .transform_point(&Point3::new(p[0], p[1], p[2]))
                .coords
        })
        .collect();
    let count = positions.len();

    let normals: Option<Vec<Vector3<f32>>> = reader.read_normals().map(|ns| {
        ns.map(|n| {
            (normal_matrix * Vector3::new(n[0], n[1], n[2]))
                .try_normalize(1e-12)
                .unwrap_or_else(Vector3::y)
        })
        .collect()
    });
    let uvs: Option<Vec<[f32; 2]>> = reader
        .read_tex_coords(0)
        .map(|t| t.into_f32().collect());
    let colors: Option<Vec<[f32; 4]>> = reader
        .read_colors(0)
        .map(|c| c.into_rgba_f32().collect());

    // Attribute arrays stay aligned with positions across primitives; fill
    // gaps with neutral values once any primitive provides the attribute.
    extend_attribute(&mut mesh.uvs, base, count, uvs, [0.0, 0.0]);
    extend_attribute(&mut mesh.colors, base, count, colors, [1.0; 4]);
    match normals {
        Some(ns) if mesh.normals.len() == base => mesh.normals.extend(ns),
        _ => mesh.normals.clear(),
    }
    mesh.positions.extend(positions);

    let material = resolve_material(mesh, material_slots, primitive, images);

    let indices: Vec<u32> = match reader.read_indices() {
        Some(indices) => indices.into_u32().collect(),
        None => (0..count as u32).collect(),
    };
    for tri in indices.chunks_exact(3) {
        if tri.iter().any(|&i| i as usize >= count) {
            bail!("glTF index out of range ({} vertices)", count);
        }
        mesh.triangles.push(Triangle {
            indices: [
                base as u32 + tri[0],
                base as u32 + tri[1],
                base as u32 + tri[2],
            ],
            material,
        });
    }
    Ok(())
}

fn extend_attribute<T: Copy>(
    dst: &mut Vec<T>,
    base: usize,
    count: usize,
    src: Option<Vec<T>>,
    neutral: T,
) {
    match src {
        Some(values) if values.len() == count => {
            if dst.len() < base {
                dst.resize(base, neutral);
            }
            dst.extend(values);
        }
        _ if !dst.is_empty() => dst.resize(base + count, neutral),
        _ => {}
    }
}

/// Index into `mesh.materials`, converting each glTF material once.
fn resolve_material(
    mesh: &mut Mesh,
    slots: &mut Vec<Option<usize>>,
    primitive: &gltf::Primitive,
    images: &[gltf::image::Data],
) -> usize {
    let gltf_material = primitive.material();
    let Some(index) = gltf_material.index() else {
        if mesh.materials.is_empty() {
            mesh.materials.push(Material::default());
        }
        return 0;
    };

    if slots.len() <= index {
        slots.resize(index + 1, None);
    }
    if let Some(slot) = slots[index] {
        return slot;
    }

    if mesh.materials.is_empty() {
        mesh.materials.push(Material::default());
    }
    let pbr = gltf_material.pbr_metallic_roughness();
    let texture = pbr
        .base_color_texture()
        .and_then(|info| images.get(info.texture().source().index()))
        .and_then(texture_image);

    mesh.materials.push(Material {
        base_color: pbr.base_color_factor(),
        texture,
    });
    let slot = mesh.materials.len() - 1;
    slots[index] = Some(slot);
    slot
}

fn texture_image(data: &gltf::image::Data) -> Option<RgbaImage> {
    use gltf::image::Format;

    let channels = match data.format {
        Format::R8 => 1,
        Format::R8G8 => 2,
        Format::R8G8B8 => 3,
        Format::R8G8B8A8 => 4,
        other => {
            warn!(format = ?other, "Unsupported texture format, using base colour only");
            return None;
        }
    };

    let pixels: Vec<u8> = data
        .pixels
        .chunks_exact(channels)
        .flat_map(|p| match channels {
            1 => [p[0], p[0], p[0], 255],
            2 => [p[0], p[0], p[0], p[1]],
            3 => [p[0], p[1], p[2], 255],
            _ => [p[0], p[1], p[2], p[3]],
        })
        .collect();

    let image = RgbaImage::from_raw(data.width, data.height, pixels);
    if image.is_none() {
        warn!("Texture buffer does not match its dimensions");
    }
    image
}

/// Nearest-texel lookup with repeat wrapping.
pub(crate) fn sample_texture(texture: &RgbaImage, uv: [f32; 2]) -> [f32; 4] {
    let (w, h) = texture.dimensions();
    if w == 0 || h == 0 {
        return [1.0; 4];
    }
    let u = uv[0] - uv[0].floor();
    let v = uv[1] - uv[1].floor();
    let x = ((u * w as f32) as u32).min(w - 1);
    let y = ((v * h as f32) as u32).min(h - 1);
    let Rgba(p) = *texture.get_pixel(x, y);
    p.map(|c| c as f32 / 255.0)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Unit quad in the z = 0 plane facing +z.
    pub(crate) fn quad(color: [f32; 4]) -> Mesh {
        let mut mesh = Mesh {
            positions: vec![
                Vector3::new(-1.0, -1.0, 0.0),
                Vector3::new(1.0, -1.0, 0.0),
                Vector3::new(1.0, 1.0, 0.0),
                Vector3::new(-1.0, 1.0, 0.0),
            ],
            triangles: vec![
                Triangle {
                    indices: [0, 1, 2],
                    material: 0,
                },
                Triangle {
                    indices: [0, 2, 3],
                    material: 0,
                },
            ],
            materials: vec![Material {
                base_color: color,
                texture: None,
            }],
            ..Mesh::default()
        };
        mesh.compute_normals();
        mesh
    }

    #[test]
    fn computed_normals_face_winding() {
        let mesh = quad([1.0; 4]);
        for n in &mesh.normals {
            assert!((n - Vector3::z()).norm() < 1e-6);
        }
    }

    #[test]
    fn normalize_centres_and_scales() {
        let mut mesh = quad([1.0; 4]);
        for p in &mut mesh.positions {
            *p = *p * 5.0 + Vector3::new(10.0, 0.0, 0.0);
        }
        mesh.normalize(0.9);
        let (lo, hi) = mesh.bounds().unwrap();
        assert!((hi.x - 0.9).abs() < 1e-5 && (lo.x + 0.9).abs() < 1e-5);
        assert!((hi.y - 0.9).abs() < 1e-5);
    }

    #[test]
    fn orient_brings_front_to_positive_z() {
        for (front, dir) in [
            (FrontDir::PosX, Vector3::x()),
            (FrontDir::NegX, -Vector3::x()),
            (FrontDir::PosY, Vector3::y()),
            (FrontDir::NegY, -Vector3::y()),
            (FrontDir::NegZ, -Vector3::z()),
            (FrontDir::PosZ, Vector3::z()),
        ] {
            let rotated = front_rotation(front) * dir;
            assert!((rotated - Vector3::z()).norm() < 1e-5, "{front}");
        }
    }

    #[test]
    fn texture_sampling_wraps() {
        let mut tex = RgbaImage::new(2, 1);
        tex.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        tex.put_pixel(1, 0, Rgba([0, 0, 255, 255]));
        assert_eq!(sample_texture(&tex, [0.25, 0.0])[0], 1.0);
        assert_eq!(sample_texture(&tex, [0.75, 0.0])[2], 1.0);
        assert_eq!(sample_texture(&tex, [1.25, 3.0])[0], 1.0);
        assert_eq!(sample_texture(&tex, [-0.25, 0.0])[2], 1.0);
    }

    #[test]
    fn obj_polygons_are_triangulated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quad.obj");
        std::fs::write(
            &path,
            "v -1 -1 0\nv 1 -1 0\nv 1 1 0\nv -1 1 0\nvt 0 0\nvt 1 0\nvt 1 1\nvt 0 1\nf 1/1 2/2 3/3 4/4\n",
        )
        .unwrap();

        let mesh = Mesh::load(&path).unwrap();
        assert_eq!(mesh.positions.len(), 4);
        assert_eq!(mesh.triangles.len(), 2);
        assert_eq!(mesh.normals.len(), 4);
        // v = 0 at the bottom of an OBJ texture is the last row of the image
        assert_eq!(mesh.uvs[0], [0.0, 1.0]);
        assert_eq!(mesh.materials.len(), 1);
        assert!(mesh.triangles.iter().all(|t| t.material == 0));
    }

    #[test]
    fn obj_without_its_mtl_uses_default_material() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tri.obj");
        std::fs::write(
            &path,
            "mtllib missing.mtl\nusemtl red\nv 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n",
        )
        .unwrap();

        let mesh = Mesh::load(&path).unwrap();
        assert_eq!(mesh.triangles[0].material, 0);
        assert_eq!(mesh.materials[0].base_color, [0.8, 0.8, 0.8, 1.0]);
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        assert!(Mesh::load(Path::new("asset.fbx")).is_err());
    }
}
