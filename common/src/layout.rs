use serde::{Deserialize, Serialize};

/// Number of fixed fields in an `fx` array before the inverse target.
pub const EFFECT_FIXED_FIELDS: usize = 11;

/// Channel arrangement of a device variant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelLayout {
    /// Red, green, blue
    Rgb,
    /// Red, green, blue, white
    #[default]
    Rgbw,
}

impl ChannelLayout {
    pub const fn channels(self) -> usize {
        match self {
            ChannelLayout::Rgb => 3,
            ChannelLayout::Rgbw => 4,
        }
    }

    /// Arity of the positional `fx` array for this layout.
    pub const fn effect_arity(self) -> usize {
        EFFECT_FIXED_FIELDS + self.channels()
    }

    /// Layout whose `fx` array has exactly `arity` fields.
    pub const fn from_effect_arity(arity: usize) -> Option<Self> {
        match arity {
            14 => Some(ChannelLayout::Rgb),
            15 => Some(ChannelLayout::Rgbw),
            _ => None,
        }
    }
}
