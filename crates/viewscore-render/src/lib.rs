//! Software rendering of 3D assets for view-consistency evaluation.
//!
//! [`SoftwareRenderer`] implements [`viewscore_core::ViewRenderer`]: it loads an
//! OBJ, glTF/GLB or STL asset, normalises it into a unit box and rasterizes it
//! from an orbit camera on the CPU. [`convert`] is a small format-dispatch utility on
//! top of the same mesh loader.
//!
//! ```no_run
//! use std::path::Path;
//! use viewscore_core::{Pose, RenderSettings, ViewRenderer};
//! use viewscore_render::SoftwareRenderer;
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut renderer = SoftwareRenderer::new(RenderSettings::default())?;
//! renderer.load_asset(Path::new("chair.glb"))?;
//! renderer.set_camera(Pose::new(0.0, 45.0));
//! renderer.render()?.save("view.png")?;
//! # Ok(())
//! # }
//! ```

pub mod camera;
pub mod convert;
pub mod glb;
pub mod mesh;
pub mod raster;
pub mod renderer;

pub use camera::OrbitCamera;
pub use convert::{convert, write_mesh, DEFAULT_VIDEO_COMMAND};
pub use glb::write_glb;
pub use mesh::{Material, Mesh, Triangle};
pub use raster::Rasterizer;
pub use renderer::SoftwareRenderer;
