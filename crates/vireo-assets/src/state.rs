//! Asset type tags and the load state machine.

use std::fmt;

/// The kind of resource an asset record holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AssetType {
    /// No type, typically an invalid or uninitialized record.
    #[default]
    None,
    Mesh,
    Tex,
    Shader,
    Material,
    Model,
    Font,
    Sprite,
    Sound,
    Solid,
    Anchor,
    RenderList,
}

impl AssetType {
    /// Short lowercase name, used in logs and generated ids.
    pub fn name(&self) -> &'static str {
        match self {
            AssetType::None => "none",
            AssetType::Mesh => "mesh",
            AssetType::Tex => "tex",
            AssetType::Shader => "shader",
            AssetType::Material => "material",
            AssetType::Model => "model",
            AssetType::Font => "font",
            AssetType::Sprite => "sprite",
            AssetType::Sound => "sound",
            AssetType::Solid => "solid",
            AssetType::Anchor => "anchor",
            AssetType::RenderList => "render_list",
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where an asset is in its loading lifecycle.
///
/// States are ordered by their integer code. Every error state is negative,
/// so "at least `LoadedMeta`" is a plain `>=` comparison and can never be
/// satisfied by a failed asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(i32)]
pub enum AssetState {
    /// The source data was read but its format is not supported, or it is
    /// corrupt.
    ErrorUnsupported = -3,
    /// The source data could not be found.
    ErrorNotFound = -2,
    /// Loading failed for some other reason.
    Error = -1,
    /// Nothing has been requested for this asset.
    #[default]
    None = 0,
    /// Queued or in progress, no data available yet.
    Loading = 1,
    /// Metadata (sizes, formats, ...) is available; the bulk data is not.
    LoadedMeta = 2,
    /// Fully loaded and ready for use.
    Loaded = 3,
}

impl AssetState {
    /// Integer code of this state.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Decode a state from its integer code. Unknown negative codes map to
    /// [`AssetState::Error`], unknown positive codes to [`AssetState::Loaded`].
    pub fn from_code(code: i32) -> Self {
        match code {
            -3 => AssetState::ErrorUnsupported,
            -2 => AssetState::ErrorNotFound,
            -1 => AssetState::Error,
            0 => AssetState::None,
            1 => AssetState::Loading,
            2 => AssetState::LoadedMeta,
            c if c < 0 => AssetState::Error,
            _ => AssetState::Loaded,
        }
    }

    /// Returns `true` for any of the error states.
    pub fn is_error(self) -> bool {
        self.code() < 0
    }

    /// Returns `true` once the asset is fully loaded.
    pub fn is_loaded(self) -> bool {
        self >= AssetState::Loaded
    }
}
