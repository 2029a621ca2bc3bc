//! Asset format conversion.
//!
//! Meshes round-trip through [`Mesh`]; `.mp4` destinations are handed to an
//! external turntable renderer.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use nalgebra::Vector3;
use tracing::{debug, info, warn};

use crate::glb::write_glb;
use crate::mesh::{extension, Mesh, MESH_EXTENSIONS};

/// External command used for video output.
pub const DEFAULT_VIDEO_COMMAND: &str = "kire";

/// Elevation of the turntable sweep passed to the video command.
const VIDEO_ELEVATION: &str = "-15";

/// Convert `input` to `output`.
///
/// A directory input requires `fmt` (e.g. `.obj`) and converts every mesh in
/// it into `output/`; sidecar files such as `.mtl` or textures are skipped.
/// Returns the files written.
pub fn convert(
    input: &Path,
    output: &Path,
    fmt: Option<&str>,
    video_command: &str,
) -> Result<Vec<PathBuf>> {
    if !input.is_dir() {
        convert_file(input, output, video_command)?;
        return Ok(vec![output.to_path_buf()]);
    }

    let Some(fmt) = fmt else {
        bail!("--fmt is required when converting a directory");
    };
    let fmt = if fmt.starts_with('.') {
        fmt.to_string()
    } else {
        format!(".{fmt}")
    };

    fs::create_dir_all(output)
        .with_context(|| format!("Failed to create output directory: {}", output.display()))?;

    let mut entries: Vec<PathBuf> = fs::read_dir(input)
        .with_context(|| format!("Failed to read directory: {}", input.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            let known = MESH_EXTENSIONS.contains(&extension(p).as_str());
            if !known {
                debug!(file = %p.display(), "Skipping non-mesh file");
            }
            known
        })
        .collect();
    entries.sort();

    let mut written = Vec::with_capacity(entries.len());
    for src in entries {
        let name = src
            .file_name()
            .and_then(|n| n.to_str())
            .context("Non UTF-8 file name")?;
        let stem = name.split('.').next().unwrap_or(name);
        let dst = output.join(format!("{stem}{fmt}"));
        info!(from = %src.display(), to = %dst.display(), "Converting");
        convert_file(&src, &dst, video_command)?;
        written.push(dst);
    }

    if written.is_empty() {
        warn!(dir = %input.display(), "No files to convert");
    }
    Ok(written)
}

fn convert_file(input: &Path, output: &Path, video_command: &str) -> Result<()> {
    if extension(output) == "mp4" {
        return render_video(input, output, video_command);
    }

    let mesh = Mesh::load(input)?;
    write_mesh(&mesh, output)
}

fn render_video(input: &Path, output: &Path, video_command: &str) -> Result<()> {
    let status = Command::new(video_command)
        .arg(input)
        .arg("--save_video")
        .arg(output)
        .args(["--elevation", VIDEO_ELEVATION, "--wogui"])
        .status()
        .with_context(|| format!("Failed to run {video_command}"))?;

    if !status.success() {
        bail!("{video_command} exited with {status}");
    }
    Ok(())
}

/// Write by extension: `.obj`, `.glb` or `.stl`.
pub fn write_mesh(mesh: &Mesh, path: &Path) -> Result<()> {
    match extension(path).as_str() {
        "obj" => write_obj(mesh, path),
        "glb" => write_glb(mesh, path),
        "stl" => write_stl(mesh, path),
        other => bail!("Unsupported output format '.{}': {}", other, path.display()),
    }
}

/// Wavefront OBJ with positions, normals and texture coordinates. Materials
/// go to a sibling `.mtl`, textures to sibling PNGs.
pub fn write_obj(mesh: &Mesh, path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create OBJ file: {}", path.display()))?;
    let mut out = BufWriter::new(file);

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("mesh");
    let with_materials = !mesh.materials.is_empty();
    if with_materials {
        let mtl = format!("{stem}.mtl");
        write_mtl(mesh, &path.with_file_name(&mtl), stem)?;
        writeln!(out, "mtllib {mtl}")?;
    }

    for p in &mesh.positions {
        writeln!(out, "v {} {} {}", p.x, p.y, p.z)?;
    }
    let has_normals = mesh.normals.len() == mesh.positions.len();
    if has_normals {
        for n in &mesh.normals {
            writeln!(out, "vn {} {} {}", n.x, n.y, n.z)?;
        }
    }
    let has_uvs = mesh.uvs.len() == mesh.positions.len();
    if has_uvs {
        // OBJ puts the texture origin bottom-left
        for uv in &mesh.uvs {
            writeln!(out, "vt {} {}", uv[0], 1.0 - uv[1])?;
        }
    }

    let mut groups: BTreeMap<usize, Vec<[u32; 3]>> = BTreeMap::new();
    for tri in &mesh.triangles {
        groups.entry(tri.material).or_default().push(tri.indices);
    }
    for (material, triangles) in groups {
        if with_materials {
            let material = if material < mesh.materials.len() { material } else { 0 };
            writeln!(out, "usemtl {}", material_name(material))?;
        }
        for indices in triangles {
            write!(out, "f")?;
            for i in indices {
                let i = i + 1;
                match (has_uvs, has_normals) {
                    (true, true) => write!(out, " {i}/{i}/{i}")?,
                    (true, false) => write!(out, " {i}/{i}")?,
                    (false, true) => write!(out, " {i}//{i}")?,
                    (false, false) => write!(out, " {i}")?,
                }
            }
            writeln!(out)?;
        }
    }

    out.flush()
        .with_context(|| format!("Failed to write OBJ file: {}", path.display()))
}

fn material_name(index: usize) -> String {
    format!("material_{index}")
}

fn write_mtl(mesh: &Mesh, path: &Path, stem: &str) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create MTL file: {}", path.display()))?;
    let mut out = BufWriter::new(file);

    for (i, material) in mesh.materials.iter().enumerate() {
        let [r, g, b, a] = material.base_color;
        writeln!(out, "newmtl {}", material_name(i))?;
        writeln!(out, "Kd {r} {g} {b}")?;
        writeln!(out, "d {a}")?;
        if let Some(texture) = &material.texture {
            let name = format!("{stem}_{i}.png");
            let texture_path = path.with_file_name(&name);
            texture
                .save(&texture_path)
                .with_context(|| format!("Failed to write texture: {}", texture_path.display()))?;
            writeln!(out, "map_Kd {name}")?;
        }
        writeln!(out)?;
    }

    out.flush()
        .with_context(|| format!("Failed to write MTL file: {}", path.display()))
}

/// Binary STL with per-face normals.
pub fn write_stl(mesh: &Mesh, path: &Path) -> Result<()> {
    use stl_io::{Normal, Triangle as StlTriangle, Vertex as StlVertex};

    let triangles: Vec<StlTriangle> = mesh
        .triangles
        .iter()
        .map(|tri| {
            let [a, b, c] = tri.indices.map(|i| mesh.positions[i as usize]);
            let n = (b - a).cross(&(c - a)).try_normalize(1e-12).unwrap_or_else(Vector3::zeros);
            StlTriangle {
                normal: Normal::new([n.x, n.y, n.z]),
                vertices: [a, b, c].map(|v| StlVertex::new([v.x, v.y, v.z])),
            }
        })
        .collect();

    let mut file = BufWriter::new(
        File::create(path)
            .with_context(|| format!("Failed to create STL file: {}", path.display()))?,
    );
    stl_io::write_stl(&mut file, triangles.iter()).context("Failed to write STL file")?;
    file.flush()?;
    Ok(())
}
