//! Render passes.
//!
//! Every stage of a frame implements [`RenderPass`]. The pipeline owns its
//! passes as `Box<dyn RenderPass>` in execution order; passes exchange
//! textures by handle, never by ownership.
//!
//! | Pass                      | Owns                          | Reads                         |
//! |---------------------------|-------------------------------|-------------------------------|
//! | [`DirectionalShadowPass`] | shadow map                    |                               |
//! | [`DepthPrePass`]          | scene depth-stencil           |                               |
//! | [`GBufferPass`]           | albedo / normal / material    | depth                         |
//! | [`DeferredLightingPass`]  | HDR colour                    | G-buffer, depth, shadow map   |
//! | [`ColorPass`] (opaque)    | HDR colour                    | depth, shadow map             |
//! | [`SkyboxPass`]            |                               | HDR colour, depth             |
//! | [`ColorPass`] (transp.)   |                               | HDR colour, depth, shadow map |
//! | [`ParticlePass`]          | particle simulations          | HDR colour, depth             |
//! | [`BlurPass`]              | ping / pong                   | any colour texture            |
//! | [`CompositePass`]         | offscreen output (optional)   | HDR colour, blur output       |

pub mod blur;
pub mod composite;
pub mod depth;
pub mod forward;
pub mod gbuffer;
pub mod lighting;
pub mod mesh;
pub mod particles;
pub mod pass;
pub mod shadow;
pub mod skybox;
pub mod uniforms;

pub use blur::BlurPass;
pub use composite::CompositePass;
pub use depth::DepthPrePass;
pub use forward::{ColorPass, ColorSelection};
pub use gbuffer::{GBufferPass, GBufferTextures};
pub use lighting::DeferredLightingPass;
pub use particles::ParticlePass;
pub use pass::{DrawContext, FrameInfo, RenderPass, UpdateContext};
pub use shadow::{DirectionalShadowPass, light_space_matrix};
pub use skybox::SkyboxPass;
pub use uniforms::{UniformInputs, UniformSetter, UniformSetters};
