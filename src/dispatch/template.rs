//! Message template rendering
//!
//! Templates use `{name}` or `{name:spec}` placeholders, where `spec` is
//! `[0][width][.precision][type]` and `type` is one of `f`, `d` or `s`.
//! `{{` and `}}` produce literal braces. Templates are checked once by
//! [`MessageTemplate::parse`]; rendering a parsed template cannot fail.

use chrono::SecondsFormat;
use std::fmt::Display;
use std::str::FromStr;

use crate::error::{PingerError, Result};
use crate::nmea::Fix;

/// Rendered in place of a value the fix or radio does not have
pub const UNAVAILABLE: &str = "unknown";

/// Values a template can reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Lat,
    Lon,
    Hdop,
    Satellites,
    FixQuality,
    Time,
    Date,
    Timestamp,
    Snr,
    RadioSnr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Float,
    Integer,
    Text,
}

impl Field {
    const NAMES: [&'static str; 11] = [
        "lat",
        "lon",
        "hdop",
        "satellites",
        "fix_quality",
        "time",
        "date",
        "timestamp",
        "iso",
        "snr",
        "radio_snr",
    ];

    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "lat" => Field::Lat,
            "lon" => Field::Lon,
            "hdop" => Field::Hdop,
            "satellites" => Field::Satellites,
            "fix_quality" => Field::FixQuality,
            "time" => Field::Time,
            "date" => Field::Date,
            "timestamp" | "iso" => Field::Timestamp,
            "snr" => Field::Snr,
            "radio_snr" => Field::RadioSnr,
            _ => return None,
        })
    }

    fn kind(self) -> Kind {
        match self {
            Field::Lat | Field::Lon | Field::Hdop | Field::Snr | Field::RadioSnr => Kind::Float,
            Field::Satellites | Field::FixQuality => Kind::Integer,
            Field::Time | Field::Date | Field::Timestamp => Kind::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Presentation {
    Fixed,
    Decimal,
    Str,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct FormatSpec {
    zero_pad: bool,
    width: Option<usize>,
    precision: Option<usize>,
    presentation: Option<Presentation>,
}

impl FormatSpec {
    /// Parse `[0][width][.precision][type]` for a field of `kind`
    fn parse(spec: &str, kind: Kind) -> std::result::Result<Self, String> {
        let mut out = FormatSpec::default();
        let mut rest = spec;

        if let Some(stripped) = rest.strip_prefix('0') {
            out.zero_pad = true;
            rest = stripped;
        }

        let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        if digits > 0 {
            out.width = Some(rest[..digits].parse().map_err(|_| "width is too large".to_string())?);
            rest = &rest[digits..];
        }

        if let Some(after_dot) = rest.strip_prefix('.') {
            let digits = after_dot.len() - after_dot.trim_start_matches(|c: char| c.is_ascii_digit()).len();
            if digits == 0 {
                return Err("precision is missing after '.'".to_string());
            }
            out.precision = Some(after_dot[..digits].parse().map_err(|_| "precision is too large".to_string())?);
            rest = &after_dot[digits..];
        }

        out.presentation = match rest {
            "" => None,
            "f" => Some(Presentation::Fixed),
            "d" => Some(Presentation::Decimal),
            "s" => Some(Presentation::Str),
            other => return Err(format!("unsupported format {:?}", other)),
        };

        match (kind, out.presentation) {
            (Kind::Float, Some(Presentation::Decimal)) => Err("'d' needs an integer value".to_string()),
            (Kind::Float | Kind::Integer, Some(Presentation::Str)) => Err("'s' needs a text value".to_string()),
            (Kind::Text, Some(Presentation::Fixed | Presentation::Decimal)) => {
                Err("numeric format on a text value".to_string())
            }
            (Kind::Text, _) if out.zero_pad => Err("zero padding needs a numeric value".to_string()),
            (Kind::Integer, None | Some(Presentation::Decimal)) if out.precision.is_some() => {
                Err("precision is not allowed with integer format".to_string())
            }
            _ => Ok(out),
        }
    }

    fn pad_number(&self, digits: String) -> String {
        let width = self.width.unwrap_or(0);
        if digits.len() >= width {
            return digits;
        }
        if self.zero_pad {
            let (sign, body) = match digits.strip_prefix('-') {
                Some(body) => ("-", body),
                None => ("", digits.as_str()),
            };
            format!("{}{:0>w$}", sign, body, w = width - sign.len())
        } else {
            format!("{:>w$}", digits, w = width)
        }
    }

    fn render_float<T: Display>(&self, value: T) -> String {
        let digits = match (self.presentation, self.precision) {
            (Some(Presentation::Fixed), precision) => format!("{:.*}", precision.unwrap_or(6), value),
            (_, Some(precision)) => format!("{:.*}", precision, value),
            (_, None) => repr_float(value.to_string()),
        };
        self.pad_number(digits)
    }

    fn render_integer(&self, value: i64) -> String {
        let digits = match self.presentation {
            Some(Presentation::Fixed) => format!("{:.*}", self.precision.unwrap_or(6), value as f64),
            _ => value.to_string(),
        };
        self.pad_number(digits)
    }

    fn render_text(&self, value: &str) -> String {
        let clipped: String = match self.precision {
            Some(precision) => value.chars().take(precision).collect(),
            None => value.to_string(),
        };
        format!("{:<w$}", clipped, w = self.width.unwrap_or(0))
    }
}

/// Whole floats keep a trailing `.0` so `37` is shown as `37.0`
fn repr_float(mut text: String) -> String {
    if text.bytes().all(|b| b.is_ascii_digit() || b == b'-') {
        text.push_str(".0");
    }
    text
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Placeholder { field: Field, spec: FormatSpec },
}

/// Everything a template can draw on for one message
#[derive(Debug, Clone, Copy)]
pub struct TemplateValues<'a> {
    pub fix: &'a Fix,
    /// SNR the radio last heard from the target node
    pub snr: Option<f32>,
    /// SNR of the most recently heard node
    pub radio_snr: Option<f32>,
}

impl<'a> TemplateValues<'a> {
    pub fn new(fix: &'a Fix) -> Self {
        Self { fix, snr: None, radio_snr: None }
    }
}

/// Checked message template
#[derive(Debug, Clone, PartialEq)]
pub struct MessageTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl MessageTemplate {
    /// Parse and check `template`
    ///
    /// # Errors
    ///
    /// Returns [`PingerError::Config`] for unknown placeholder names,
    /// unsupported format specs, and unbalanced braces.
    pub fn parse(template: &str) -> Result<Self> {
        let invalid = |reason: String| PingerError::Config(format!("message_template {:?}: {}", template, reason));

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err(invalid("single '}' (use '}}' for a literal brace)".to_string())),
                '{' => {
                    let mut inner = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some('{') | None => return Err(invalid("unclosed '{'".to_string())),
                            Some(ch) => inner.push(ch),
                        }
                    }

                    let (name, spec) = match inner.split_once(':') {
                        Some((name, spec)) => (name.trim(), spec),
                        None => (inner.trim(), ""),
                    };
                    let field = Field::from_name(name).ok_or_else(|| {
                        invalid(format!(
                            "unknown placeholder {{{}}} (available: {})",
                            name,
                            Field::NAMES.join(", ")
                        ))
                    })?;
                    let spec = FormatSpec::parse(spec, field.kind())
                        .map_err(|reason| invalid(format!("{{{}:{}}}: {}", name, spec, reason)))?;

                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Placeholder { field, spec });
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            source: template.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the template shows signal strength, which needs a live radio
    pub fn uses_signal(&self) -> bool {
        self.segments.iter().any(|s| {
            matches!(
                s,
                Segment::Placeholder {
                    field: Field::Snr | Field::RadioSnr,
                    ..
                }
            )
        })
    }

    pub fn render(&self, values: &TemplateValues<'_>) -> String {
        let mut out = String::with_capacity(self.source.len() + 32);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder { field, spec } => out.push_str(&render_field(*field, spec, values)),
            }
        }
        out
    }
}

impl FromStr for MessageTemplate {
    type Err = PingerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn render_field(field: Field, spec: &FormatSpec, values: &TemplateValues<'_>) -> String {
    let fix = values.fix;
    let float32 = |value: Option<f32>| match value {
        Some(v) => spec.render_float(v),
        None => UNAVAILABLE.to_string(),
    };

    match field {
        Field::Lat => spec.render_float(fix.latitude),
        Field::Lon => spec.render_float(fix.longitude),
        Field::Hdop => float32(fix.hdop),
        Field::Snr => float32(values.snr),
        Field::RadioSnr => float32(values.radio_snr),
        Field::Satellites => match fix.satellites {
            Some(sats) => spec.render_integer(i64::from(sats)),
            None => UNAVAILABLE.to_string(),
        },
        Field::FixQuality => match fix.fix_quality {
            Some(quality) => spec.render_integer(i64::from(quality.code())),
            None => UNAVAILABLE.to_string(),
        },
        Field::Time => {
            let time = fix.time.unwrap_or_else(|| fix.timestamp.time());
            spec.render_text(&time.format("%H:%M:%S").to_string())
        }
        Field::Date => {
            let date = fix.date.unwrap_or_else(|| fix.timestamp.date_naive());
            spec.render_text(&date.format("%Y-%m-%d").to_string())
        }
        Field::Timestamp => spec.render_text(&fix.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, false)),
    }
}
