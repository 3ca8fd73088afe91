//! Compound node parameters stored as text.
//!
//! Two encodings exist:
//! - `RAMP:t0,r0,g0,b0;t1,r1,g1,b1;...` for color ramps
//! - `NOISE2:<type>;<scale>,<detail>,<roughness>,<distortion>` for noise
//!
//! Parsing keeps the source text so that reserializing an unedited value
//! reproduces it byte for byte.

use crate::error::ParamError;
use crate::value::PinValue;
use std::fmt;
use std::str::FromStr;

const RAMP_PREFIX: &str = "RAMP:";
const NOISE_PREFIX: &str = "NOISE2:";

fn parse_number(text: &str) -> Result<f32, ParamError> {
    text.trim()
        .parse()
        .map_err(|_| ParamError::Number(text.to_string()))
}

/// One color stop of a ramp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampStop {
    pub position: f32,
    pub color: [f32; 3],
}

impl RampStop {
    pub const fn new(position: f32, color: [f32; 3]) -> Self {
        Self { position, color }
    }
}

impl fmt::Display for RampStop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b] = self.color;
        write!(f, "{},{r},{g},{b}", self.position)
    }
}

/// Piecewise-linear color gradient.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorRamp {
    stops: Vec<RampStop>,
    /// Source text of each stop, dropped once that stop is edited.
    tokens: Vec<Option<String>>,
    /// Full source text, dropped on any edit.
    source: Option<String>,
}

impl ColorRamp {
    pub fn new(stops: Vec<RampStop>) -> Self {
        let tokens = vec![None; stops.len()];
        Self {
            stops,
            tokens,
            source: None,
        }
    }

    pub fn parse(text: &str) -> Result<Self, ParamError> {
        let body = text.strip_prefix(RAMP_PREFIX).ok_or(ParamError::Prefix {
            expected: RAMP_PREFIX,
        })?;

        let mut stops = Vec::new();
        let mut tokens = Vec::new();
        for (index, segment) in body.split(';').filter(|s| !s.trim().is_empty()).enumerate() {
            let malformed = || ParamError::Stop {
                index,
                text: segment.to_string(),
            };
            let values = segment
                .split(',')
                .map(parse_number)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| malformed())?;
            let [position, r, g, b] = values[..] else {
                return Err(malformed());
            };
            stops.push(RampStop::new(position, [r, g, b]));
            tokens.push(Some(segment.to_string()));
        }

        if stops.is_empty() {
            return Err(ParamError::EmptyRamp);
        }
        Ok(Self {
            stops,
            tokens,
            source: Some(text.to_string()),
        })
    }

    pub fn from_value(value: &PinValue) -> Result<Self, ParamError> {
        Self::parse(value.as_text().ok_or(ParamError::NotText)?)
    }

    pub fn to_value(&self) -> PinValue {
        PinValue::Text(self.to_string())
    }

    /// Stops in stored order.
    pub fn stops(&self) -> &[RampStop] {
        &self.stops
    }

    /// Stops ordered by position.
    pub fn sorted_stops(&self) -> Vec<RampStop> {
        let mut stops = self.stops.clone();
        stops.sort_by(|a, b| a.position.total_cmp(&b.position));
        stops
    }

    /// Replace a stop. Returns `false` if `index` is out of range.
    pub fn set_stop(&mut self, index: usize, stop: RampStop) -> bool {
        let Some(slot) = self.stops.get_mut(index) else {
            return false;
        };
        *slot = stop;
        self.tokens[index] = None;
        self.source = None;
        true
    }

    pub fn push_stop(&mut self, stop: RampStop) {
        self.stops.push(stop);
        self.tokens.push(None);
        self.source = None;
    }

    /// Remove a stop. The last stop cannot be removed.
    pub fn remove_stop(&mut self, index: usize) -> Option<RampStop> {
        if index >= self.stops.len() || self.stops.len() == 1 {
            return None;
        }
        self.tokens.remove(index);
        self.source = None;
        Some(self.stops.remove(index))
    }

    /// Color at `t`, clamped to the first and last stop.
    pub fn evaluate(&self, t: f32) -> [f32; 3] {
        let stops = self.sorted_stops();
        let (Some(first), Some(last)) = (stops.first(), stops.last()) else {
            return [0.0; 3];
        };
        if t <= first.position {
            return first.color;
        }
        for pair in stops.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if t <= b.position {
                let span = b.position - a.position;
                let f = if span > 0.0 { (t - a.position) / span } else { 1.0 };
                return std::array::from_fn(|i| a.color[i] + (b.color[i] - a.color[i]) * f);
            }
        }
        last.color
    }
}

impl fmt::Display for ColorRamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(source) = &self.source {
            return f.write_str(source);
        }
        f.write_str(RAMP_PREFIX)?;
        for (i, (stop, token)) in self.stops.iter().zip(&self.tokens).enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            match token {
                Some(text) => f.write_str(text)?,
                None => write!(f, "{stop}")?,
            }
        }
        Ok(())
    }
}

impl FromStr for ColorRamp {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Fractal flavour of the noise texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoiseKind {
    Fbm,
    Ridged,
    Turbulence,
}

impl NoiseKind {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Fbm => "fbm",
            Self::Ridged => "ridged",
            Self::Turbulence => "turbulence",
        }
    }

    /// Selector passed to `noise_texture` in generated code.
    pub const fn glsl_index(self) -> i32 {
        match self {
            Self::Fbm => 0,
            Self::Ridged => 1,
            Self::Turbulence => 2,
        }
    }

    fn parse(text: &str) -> Result<Self, ParamError> {
        match text.trim() {
            "fbm" => Ok(Self::Fbm),
            "ridged" => Ok(Self::Ridged),
            "turbulence" => Ok(Self::Turbulence),
            other => Err(ParamError::NoiseType(other.to_string())),
        }
    }
}

/// Settings of a noise texture node.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseParams {
    kind: NoiseKind,
    scale: f32,
    detail: f32,
    roughness: f32,
    distortion: f32,
    source: Option<String>,
}

impl Default for NoiseParams {
    fn default() -> Self {
        Self::new(NoiseKind::Fbm, 5.0, 2.0, 0.5, 0.0)
    }
}

impl NoiseParams {
    pub const fn new(kind: NoiseKind, scale: f32, detail: f32, roughness: f32, distortion: f32) -> Self {
        Self {
            kind,
            scale,
            detail,
            roughness,
            distortion,
            source: None,
        }
    }

    pub fn parse(text: &str) -> Result<Self, ParamError> {
        let body = text.strip_prefix(NOISE_PREFIX).ok_or(ParamError::Prefix {
            expected: NOISE_PREFIX,
        })?;
        let (kind, values) = body.split_once(';').ok_or(ParamError::ValueCount {
            expected: 4,
            actual: 0,
        })?;
        let kind = NoiseKind::parse(kind)?;
        let values = values
            .split(',')
            .map(parse_number)
            .collect::<Result<Vec<_>, _>>()?;
        let [scale, detail, roughness, distortion] = values[..] else {
            return Err(ParamError::ValueCount {
                expected: 4,
                actual: values.len(),
            });
        };

        Ok(Self {
            kind,
            scale,
            detail,
            roughness,
            distortion,
            source: Some(text.to_string()),
        })
    }

    pub fn from_value(value: &PinValue) -> Result<Self, ParamError> {
        Self::parse(value.as_text().ok_or(ParamError::NotText)?)
    }

    pub fn to_value(&self) -> PinValue {
        PinValue::Text(self.to_string())
    }

    pub const fn kind(&self) -> NoiseKind {
        self.kind
    }

    pub const fn scale(&self) -> f32 {
        self.scale
    }

    pub const fn detail(&self) -> f32 {
        self.detail
    }

    pub const fn roughness(&self) -> f32 {
        self.roughness
    }

    pub const fn distortion(&self) -> f32 {
        self.distortion
    }

    pub fn set_kind(&mut self, kind: NoiseKind) {
        self.kind = kind;
        self.source = None;
    }

    pub fn set_scale(&mut self, scale: f32) {
        self.scale = scale;
        self.source = None;
    }

    pub fn set_detail(&mut self, detail: f32) {
        self.detail = detail;
        self.source = None;
    }

    pub fn set_roughness(&mut self, roughness: f32) {
        self.roughness = roughness;
        self.source = None;
    }

    pub fn set_distortion(&mut self, distortion: f32) {
        self.distortion = distortion;
        self.source = None;
    }
}

impl fmt::Display for NoiseParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(source) = &self.source {
            return f.write_str(source);
        }
        write!(
            f,
            "{NOISE_PREFIX}{};{},{},{},{}",
            self.kind.name(),
            self.scale,
            self.detail,
            self.roughness,
            self.distortion
        )
    }
}

impl FromStr for NoiseParams {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn ramp_round_trips_source_text() {
        // Unusual formatting must survive untouched
        for text in [
            "RAMP:0,0,0,0;1,1,1,1",
            "RAMP:0.000,0.1,0.2,0.3; 0.5,1e-1,0.50,1.0;1,1,1,1;",
            "RAMP:0.25,1,0,0",
        ] {
            assert_eq!(ColorRamp::parse(text).unwrap().to_string(), text);
        }
    }

    #[test]
    fn editing_one_stop_keeps_the_others_verbatim() {
        let mut ramp = ColorRamp::parse("RAMP:0.000,0,0,0;0.50,1.0,0,0;1,1,1,1").unwrap();
        assert!(ramp.set_stop(1, RampStop::new(0.6, [0.0, 1.0, 0.0])));
        assert_eq!(ramp.to_string(), "RAMP:0.000,0,0,0;0.6,0,1,0;1,1,1,1");
        assert!(!ramp.set_stop(7, RampStop::new(0.0, [0.0; 3])));
    }

    #[test]
    fn ramp_edits() {
        let mut ramp = ColorRamp::new(vec![RampStop::new(0.0, [0.0; 3])]);
        assert_eq!(ramp.remove_stop(0), None);
        ramp.push_stop(RampStop::new(1.0, [1.0, 0.5, 0.25]));
        assert_eq!(ramp.to_string(), "RAMP:0,0,0,0;1,1,0.5,0.25");
        assert!(ramp.remove_stop(0).is_some());
        assert_eq!(ramp.to_string(), "RAMP:1,1,0.5,0.25");
    }

    #[test]
    fn ramp_rejects_malformed_text() {
        assert_eq!(
            ColorRamp::parse("0,0,0,0").unwrap_err(),
            ParamError::Prefix { expected: "RAMP:" }
        );
        assert_eq!(ColorRamp::parse("RAMP:").unwrap_err(), ParamError::EmptyRamp);
        assert_eq!(
            ColorRamp::parse("RAMP:0,0,0;1,1,1,1").unwrap_err(),
            ParamError::Stop {
                index: 0,
                text: "0,0,0".to_string()
            }
        );
        assert!(matches!(
            ColorRamp::parse("RAMP:0,0,0,0;x,1,1,1"),
            Err(ParamError::Stop { index: 1, .. })
        ));
    }

    #[test]
    fn ramp_evaluation() {
        let ramp = ColorRamp::parse("RAMP:1,1,1,1;0,0,0,0;0.5,1,0,0").unwrap();
        assert_eq!(ramp.evaluate(-1.0), [0.0; 3]);
        assert_eq!(ramp.evaluate(2.0), [1.0; 3]);
        assert_eq!(ramp.evaluate(0.5), [1.0, 0.0, 0.0]);
        let mid = ramp.evaluate(0.25);
        assert_relative_eq!(mid[0], 0.5);
        assert_relative_eq!(mid[1], 0.0);
        let upper = ramp.evaluate(0.75);
        assert_relative_eq!(upper[1], 0.5);
    }

    #[test]
    fn noise_round_trip() {
        for text in ["NOISE2:fbm;5,2,0.5,0", "NOISE2:ridged;  2.50,4,0.7,1.0"] {
            assert_eq!(NoiseParams::parse(text).unwrap().to_string(), text);
        }
        let noise = NoiseParams::parse("NOISE2:turbulence;1,2,3,4").unwrap();
        assert_eq!(noise.kind(), NoiseKind::Turbulence);
        assert_eq!(
            (noise.scale(), noise.detail(), noise.roughness(), noise.distortion()),
            (1.0, 2.0, 3.0, 4.0)
        );
    }

    #[test]
    fn noise_edit_reformats() {
        let mut noise = NoiseParams::parse("NOISE2:fbm;5.00,2,0.5,0").unwrap();
        noise.set_kind(NoiseKind::Ridged);
        assert_eq!(noise.to_string(), "NOISE2:ridged;5,2,0.5,0");
        assert_eq!(NoiseParams::default().to_string(), crate::node::DEFAULT_NOISE);
    }

    #[test]
    fn noise_rejects_malformed_text() {
        assert!(matches!(
            NoiseParams::parse("NOISE:fbm;1,1,1,1"),
            Err(ParamError::Prefix { .. })
        ));
        assert_eq!(
            NoiseParams::parse("NOISE2:perlin;1,1,1,1").unwrap_err(),
            ParamError::NoiseType("perlin".to_string())
        );
        assert_eq!(
            NoiseParams::parse("NOISE2:fbm;1,1").unwrap_err(),
            ParamError::ValueCount {
                expected: 4,
                actual: 2
            }
        );
        assert_eq!(
            NoiseParams::from_value(&PinValue::Float(1.0)).unwrap_err(),
            ParamError::NotText
        );
    }
}
