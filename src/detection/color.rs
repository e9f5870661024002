use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CloakError, Result};

/// Largest hue value accepted as an upper bound.
///
/// Hue is stored halved (0..=179) so it fits a byte; 180 is tolerated as an
/// upper bound so the wrap-around half of red can be written as `170..=180`.
pub const HUE_LIMIT: u8 = 180;

/// A single pixel in 8-bit hue-saturation-value form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hsv {
    pub h: u8,
    pub s: u8,
    pub v: u8,
}

impl Hsv {
    /// Convert an RGB pixel using the 8-bit convention: hue in degrees / 2,
    /// saturation and value scaled to 0..=255.
    pub fn from_rgb([r, g, b]: [u8; 3]) -> Self {
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let chroma = (max - min) as f32;

        let v = max;
        let s = if max == 0 {
            0
        } else {
            (chroma * 255.0 / max as f32).round() as u8
        };

        if chroma == 0.0 {
            return Self { h: 0, s, v };
        }

        let (r, g, b) = (r as f32, g as f32, b as f32);
        let mut degrees = if max as f32 == r {
            60.0 * (g - b) / chroma
        } else if max as f32 == g {
            120.0 + 60.0 * (b - r) / chroma
        } else {
            240.0 + 60.0 * (r - g) / chroma
        };
        if degrees < 0.0 {
            degrees += 360.0;
        }

        // 360 degrees maps back onto 0
        let h = ((degrees / 2.0).round() as u16 % 180) as u8;
        Self { h, s, v }
    }
}

/// Inclusive lower/upper HSV bounds describing one cloak color.
///
/// Colors that straddle the hue wrap (red) need two ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRange", into = "RawRange")]
pub struct ColorRange {
    lower: Hsv,
    upper: Hsv,
}

impl ColorRange {
    pub fn new(lower: [u8; 3], upper: [u8; 3]) -> Result<Self> {
        for (channel, (lo, hi)) in ["hue", "saturation", "value"]
            .iter()
            .zip(lower.iter().zip(upper.iter()))
        {
            if lo > hi {
                return Err(CloakError::InvalidRange(format!(
                    "{channel} lower bound {lo} exceeds upper bound {hi}"
                )));
            }
        }
        if upper[0] > HUE_LIMIT {
            return Err(CloakError::InvalidRange(format!(
                "hue upper bound {} exceeds {HUE_LIMIT}",
                upper[0]
            )));
        }

        Ok(Self {
            lower: Hsv {
                h: lower[0],
                s: lower[1],
                v: lower[2],
            },
            upper: Hsv {
                h: upper[0],
                s: upper[1],
                v: upper[2],
            },
        })
    }

    /// The two ranges covering a saturated red cloak on either side of hue 0.
    pub fn red() -> [Self; 2] {
        [
            Self {
                lower: Hsv { h: 0, s: 120, v: 70 },
                upper: Hsv { h: 10, s: 255, v: 255 },
            },
            Self {
                lower: Hsv { h: 170, s: 120, v: 70 },
                upper: Hsv { h: 180, s: 255, v: 255 },
            },
        ]
    }

    pub fn lower(&self) -> [u8; 3] {
        [self.lower.h, self.lower.s, self.lower.v]
    }

    pub fn upper(&self) -> [u8; 3] {
        [self.upper.h, self.upper.s, self.upper.v]
    }

    #[inline]
    pub fn contains(&self, px: Hsv) -> bool {
        (self.lower.h..=self.upper.h).contains(&px.h)
            && (self.lower.s..=self.upper.s).contains(&px.s)
            && (self.lower.v..=self.upper.v).contains(&px.v)
    }
}

impl fmt::Display for ColorRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [lh, ls, lv] = self.lower();
        let [uh, us, uv] = self.upper();
        write!(f, "{lh},{ls},{lv}:{uh},{us},{uv}")
    }
}

/// Parses `h,s,v:h,s,v`.
impl FromStr for ColorRange {
    type Err = CloakError;

    fn from_str(s: &str) -> Result<Self> {
        let (lower, upper) = s
            .split_once(':')
            .ok_or_else(|| CloakError::InvalidRange(format!("expected LOWER:UPPER, got {s:?}")))?;
        Self::new(parse_triple(lower)?, parse_triple(upper)?)
    }
}

fn parse_triple(s: &str) -> Result<[u8; 3]> {
    let parts = s
        .split(',')
        .map(|p| {
            p.trim()
                .parse::<u8>()
                .map_err(|e| CloakError::InvalidRange(format!("bad channel {p:?}: {e}")))
        })
        .collect::<Result<Vec<u8>>>()?;

    <[u8; 3]>::try_from(parts.as_slice())
        .map_err(|_| CloakError::InvalidRange(format!("expected three channels, got {s:?}")))
}

#[derive(Serialize, Deserialize)]
struct RawRange {
    lower: [u8; 3],
    upper: [u8; 3],
}

impl TryFrom<RawRange> for ColorRange {
    type Error = CloakError;

    fn try_from(raw: RawRange) -> Result<Self> {
        Self::new(raw.lower, raw.upper)
    }
}

impl From<ColorRange> for RawRange {
    fn from(range: ColorRange) -> Self {
        Self {
            lower: range.lower(),
            upper: range.upper(),
        }
    }
}
