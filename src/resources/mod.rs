//! Resource management
//!
//! ID-keyed tables for shaders, materials, render objects and textures, plus
//! the data each table entry is created from.

mod material;
mod mesh;
mod registry;
mod render_object;
mod shader;
mod table;
mod texture;
mod vertex;

pub use material::*;
pub use mesh::*;
pub use registry::*;
pub use render_object::*;
pub use shader::*;
pub use table::*;
pub use texture::*;
pub use vertex::*;
