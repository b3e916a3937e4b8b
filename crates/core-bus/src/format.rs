//! Pixel byte orders understood by the LED chips on a bus.

/// Channel order on the wire. The engine always works in RGB; the
/// transmitter reorders each pixel as it expands it into line symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LedBusFormat {
    Rgb,
    Rbg,
    #[default]
    Grb,
    Gbr,
    Brg,
    Bgr,
}

impl LedBusFormat {
    pub const ALL: [LedBusFormat; 6] = [
        LedBusFormat::Rgb,
        LedBusFormat::Rbg,
        LedBusFormat::Grb,
        LedBusFormat::Gbr,
        LedBusFormat::Brg,
        LedBusFormat::Bgr,
    ];

    /// Canonical upper-case name, as used in bus config files.
    pub fn name(self) -> &'static str {
        match self {
            LedBusFormat::Rgb => "RGB",
            LedBusFormat::Rbg => "RBG",
            LedBusFormat::Grb => "GRB",
            LedBusFormat::Gbr => "GBR",
            LedBusFormat::Brg => "BRG",
            LedBusFormat::Bgr => "BGR",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    /// Reorder one RGB pixel into this format's wire order.
    pub fn reorder(self, rgb: [u8; 3]) -> [u8; 3] {
        let [r, g, b] = rgb;
        match self {
            LedBusFormat::Rgb => [r, g, b],
            LedBusFormat::Rbg => [r, b, g],
            LedBusFormat::Grb => [g, r, b],
            LedBusFormat::Gbr => [g, b, r],
            LedBusFormat::Brg => [b, r, g],
            LedBusFormat::Bgr => [b, g, r],
        }
    }
}
