//! Binary glTF (`.glb`) writer.
//!
//! One node, one mesh, one primitive per material. Vertex attributes are
//! shared between primitives; textures are embedded as PNG buffer views.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Cursor, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};

use crate::mesh::Mesh;

const GLB_MAGIC: u32 = 0x4654_6C67; // "glTF"
const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

const FLOAT: u32 = 5126;
const UNSIGNED_INT: u32 = 5125;
const ARRAY_BUFFER: u32 = 34962;
const ELEMENT_ARRAY_BUFFER: u32 = 34963;

/// Binary payload and the views and accessors describing it.
#[derive(Default)]
struct BinBuilder {
    data: Vec<u8>,
    views: Vec<Value>,
    accessors: Vec<Value>,
}

impl BinBuilder {
    fn push_view(&mut self, bytes: &[u8], target: Option<u32>) -> usize {
        self.data.resize(align4(self.data.len()), 0);
        let mut view = json!({
            "buffer": 0,
            "byteOffset": self.data.len(),
            "byteLength": bytes.len(),
        });
        if let Some(target) = target {
            view["target"] = json!(target);
        }
        self.data.extend_from_slice(bytes);
        self.views.push(view);
        self.views.len() - 1
    }

    fn push_floats<const N: usize>(&mut self, values: &[[f32; N]], kind: &str) -> usize {
        let bytes: Vec<u8> = values.iter().flatten().flat_map(|v| v.to_le_bytes()).collect();
        let view = self.push_view(&bytes, Some(ARRAY_BUFFER));
        self.accessors.push(json!({
            "bufferView": view,
            "componentType": FLOAT,
            "count": values.len(),
            "type": kind,
        }));
        self.accessors.len() - 1
    }

    fn push_indices(&mut self, indices: &[u32]) -> usize {
        let bytes: Vec<u8> = indices.iter().flat_map(|i| i.to_le_bytes()).collect();
        let view = self.push_view(&bytes, Some(ELEMENT_ARRAY_BUFFER));
        self.accessors.push(json!({
            "bufferView": view,
            "componentType": UNSIGNED_INT,
            "count": indices.len(),
            "type": "SCALAR",
        }));
        self.accessors.len() - 1
    }
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// Write `mesh` as a self-contained `.glb`.
pub fn write_glb(mesh: &Mesh, path: &Path) -> Result<()> {
    let (document, bin) = build_document(mesh)?;
    let json = serde_json::to_vec(&document)?;

    let json_len = align4(json.len());
    let bin_len = align4(bin.len());
    let total = 12 + 8 + json_len + 8 + bin_len;
    let total = u32::try_from(total).context("Mesh too large for GLB")?;

    let file = File::create(path)
        .with_context(|| format!("Failed to create GLB file: {}", path.display()))?;
    let mut out = BufWriter::new(file);

    out.write_all(&GLB_MAGIC.to_le_bytes())?;
    out.write_all(&2u32.to_le_bytes())?;
    out.write_all(&total.to_le_bytes())?;

    out.write_all(&(json_len as u32).to_le_bytes())?;
    out.write_all(&CHUNK_JSON.to_le_bytes())?;
    out.write_all(&json)?;
    out.write_all(&b"   "[..json_len - json.len()])?;

    out.write_all(&(bin_len as u32).to_le_bytes())?;
    out.write_all(&CHUNK_BIN.to_le_bytes())?;
    out.write_all(&bin)?;
    out.write_all(&[0u8; 3][..bin_len - bin.len()])?;

    out.flush()
        .with_context(|| format!("Failed to write GLB file: {}", path.display()))
}

fn build_document(mesh: &Mesh) -> Result<(Value, Vec<u8>)> {
    let Some((lo, hi)) = mesh.bounds() else {
        bail!("Cannot export a mesh without vertices");
    };
    if mesh.triangles.is_empty() {
        bail!("Cannot export a mesh without triangles");
    }

    let mut bin = BinBuilder::default();
    let count = mesh.positions.len();

    let positions: Vec<[f32; 3]> = mesh.positions.iter().map(|p| [p.x, p.y, p.z]).collect();
    let position = bin.push_floats(&positions, "VEC3");
    bin.accessors[position]["min"] = json!([lo.x, lo.y, lo.z]);
    bin.accessors[position]["max"] = json!([hi.x, hi.y, hi.z]);

    let mut attributes = json!({ "POSITION": position });
    if mesh.normals.len() == count {
        let normals: Vec<[f32; 3]> = mesh.normals.iter().map(|n| [n.x, n.y, n.z]).collect();
        attributes["NORMAL"] = json!(bin.push_floats(&normals, "VEC3"));
    }
    if mesh.uvs.len() == count {
        attributes["TEXCOORD_0"] = json!(bin.push_floats(&mesh.uvs, "VEC2"));
    }
    if mesh.colors.len() == count {
        attributes["COLOR_0"] = json!(bin.push_floats(&mesh.colors, "VEC4"));
    }

    let mut materials = Vec::with_capacity(mesh.materials.len());
    let mut images = Vec::new();
    for material in &mesh.materials {
        let mut pbr = json!({
            "baseColorFactor": material.base_color,
            "metallicFactor": 0.0,
            "roughnessFactor": 1.0,
        });
        if let Some(texture) = &material.texture {
            let mut png = Vec::new();
            texture
                .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
                .context("Failed to encode texture")?;
            let view = bin.push_view(&png, None);
            images.push(json!({ "bufferView": view, "mimeType": "image/png" }));
            pbr["baseColorTexture"] = json!({ "index": images.len() - 1 });
        }
        materials.push(json!({ "pbrMetallicRoughness": pbr }));
    }

    let mut groups: BTreeMap<usize, Vec<u32>> = BTreeMap::new();
    for tri in &mesh.triangles {
        groups.entry(tri.material).or_default().extend(tri.indices);
    }
    let primitives: Vec<Value> = groups
        .into_iter()
        .map(|(material, indices)| {
            let mut primitive = json!({
                "attributes": attributes.clone(),
                "indices": bin.push_indices(&indices),
                "mode": 4,
            });
            if material < materials.len() {
                primitive["material"] = json!(material);
            }
            primitive
        })
        .collect();

    let textures: Vec<Value> = (0..images.len()).map(|i| json!({ "source": i })).collect();

    let mut document = json!({
        "asset": { "generator": "viewscore", "version": "2.0" },
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "mesh": 0 }],
        "meshes": [{ "primitives": primitives }],
        "accessors": bin.accessors,
        "bufferViews": bin.views,
        "buffers": [{ "byteLength": bin.data.len() }],
    });
    if !materials.is_empty() {
        document["materials"] = json!(materials);
    }
    if !images.is_empty() {
        document["images"] = json!(images);
        document["textures"] = json!(textures);
    }

    Ok((document, bin.data))
}
