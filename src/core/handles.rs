//! Opaque GPU object handles.
//!
//! Every backend object is addressed through a generational slot-map key so
//! that a stale handle can never alias a newer object.

use slotmap::new_key_type;

new_key_type! {
    /// A compiled shader stage.
    pub struct ShaderHandle;
    /// A linked shader program.
    pub struct ProgramHandle;
    /// A texture (colour, depth or cube map).
    pub struct TextureHandle;
    /// A framebuffer object with its attachment list.
    pub struct FramebufferHandle;
    /// Vertex/index data with its attribute layout.
    pub struct GeometryHandle;
    /// A GPU-side sync object.
    pub struct FenceHandle;
}
