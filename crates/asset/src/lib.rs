//! Asset pipeline: STL codec, loop subdivision, and the file-memoized
//! subdivision cache the viewer resolves meshes through.

pub mod cache;
pub mod mesh;
pub mod stl;
pub mod subdivide;

pub use cache::{CacheError, MeshCache};
pub use mesh::{MeshData, MeshVertex};
