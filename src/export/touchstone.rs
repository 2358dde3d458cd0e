//! Touchstone v1 reader and writer
//!
//! Files are written with the option line `# HZ S RI R 50`: frequency in
//! hertz, real/imaginary pairs, 50 Ω reference. A 1-port row holds S11; a
//! 2-port row holds S11, S21, S12 and S22 in that order.
//!
//! The reader accepts any frequency unit (HZ/KHZ/MHZ/GHZ) and any value
//! format (RI/MA/DB), and uses the Touchstone defaults (`GHZ S MA R 50`)
//! when the option line is missing.

use crate::error::{Result, VnaError};
use crate::types::{Datapoint, MeasurementBuffer, REFERENCE_IMPEDANCE};
use num_complex::Complex64;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Option line written to every file
pub const OPTION_LINE: &str = "# HZ S RI R 50";

/// Comment noting that the cross parameters were not measured
pub const SYNTHESIZED_NOTE: &str = "S12 and S22 are synthesized as zero, not measured";

/// Frequency unit from the option line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrequencyUnit {
    Hz,
    KHz,
    MHz,
    GHz,
}

impl FrequencyUnit {
    /// Multiplier to hertz
    pub fn multiplier(&self) -> f64 {
        match self {
            FrequencyUnit::Hz => 1.0,
            FrequencyUnit::KHz => 1e3,
            FrequencyUnit::MHz => 1e6,
            FrequencyUnit::GHz => 1e9,
        }
    }
}

/// Value format from the option line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueFormat {
    /// Real, imaginary
    RealImaginary,
    /// Linear magnitude, angle in degrees
    MagnitudeAngle,
    /// Magnitude in dB, angle in degrees
    DecibelAngle,
}

impl ValueFormat {
    fn to_complex(self, a: f64, b: f64) -> Complex64 {
        match self {
            ValueFormat::RealImaginary => Complex64::new(a, b),
            ValueFormat::MagnitudeAngle => Complex64::from_polar(a, b.to_radians()),
            ValueFormat::DecibelAngle => {
                Complex64::from_polar(10f64.powf(a / 20.0), b.to_radians())
            }
        }
    }
}

/// Parsed option line
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptionLine {
    /// Unit of the frequency column
    pub unit: FrequencyUnit,
    /// Encoding of each value pair
    pub format: ValueFormat,
    /// Reference impedance in ohms
    pub impedance: f64,
}

impl Default for OptionLine {
    fn default() -> Self {
        Self {
            unit: FrequencyUnit::GHz,
            format: ValueFormat::MagnitudeAngle,
            impedance: REFERENCE_IMPEDANCE,
        }
    }
}

impl OptionLine {
    /// Parse the text after `#`
    pub fn parse(text: &str) -> Result<Self> {
        let mut option = Self::default();
        let mut tokens = text.split_whitespace();
        while let Some(token) = tokens.next() {
            match token.to_ascii_uppercase().as_str() {
                "HZ" => option.unit = FrequencyUnit::Hz,
                "KHZ" => option.unit = FrequencyUnit::KHz,
                "MHZ" => option.unit = FrequencyUnit::MHz,
                "GHZ" => option.unit = FrequencyUnit::GHz,
                "RI" => option.format = ValueFormat::RealImaginary,
                "MA" => option.format = ValueFormat::MagnitudeAngle,
                "DB" => option.format = ValueFormat::DecibelAngle,
                "S" => {}
                "R" => {
                    let value = tokens.next().ok_or_else(|| {
                        VnaError::Touchstone("missing reference impedance after R".to_string())
                    })?;
                    option.impedance = value.parse().map_err(|_| {
                        VnaError::Touchstone(format!("invalid reference impedance '{}'", value))
                    })?;
                }
                other => {
                    return Err(VnaError::Touchstone(format!(
                        "unsupported option '{}'",
                        other
                    )))
                }
            }
        }
        Ok(option)
    }
}

/// Contents of a Touchstone file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Touchstone {
    /// Input reflection
    pub s11: MeasurementBuffer,
    /// Forward transmission; empty for a 1-port file
    pub s21: MeasurementBuffer,
    /// Reverse transmission
    pub s12: MeasurementBuffer,
    /// Output reflection
    pub s22: MeasurementBuffer,
    /// Comment lines, without the leading `!`
    pub comments: Vec<String>,
    /// Reference impedance
    pub impedance: f64,
}

impl Touchstone {
    /// A 1-port file holding S11
    pub fn one_port(s11: MeasurementBuffer) -> Self {
        Self {
            s11,
            impedance: REFERENCE_IMPEDANCE,
            ..Default::default()
        }
    }

    /// A 2-port file holding S11 and S21
    ///
    /// S12 and S22 are zero at every S11 frequency, and a comment saying so
    /// is added to the file.
    pub fn two_port(s11: MeasurementBuffer, s21: MeasurementBuffer) -> Self {
        let zeros: MeasurementBuffer = s11.iter().map(|p| Datapoint::new(p.freq, 0.0, 0.0)).collect();
        Self {
            s12: zeros.clone(),
            s22: zeros,
            s11,
            s21,
            comments: vec![SYNTHESIZED_NOTE.to_string()],
            impedance: REFERENCE_IMPEDANCE,
        }
    }

    /// Number of ports this file describes
    pub fn ports(&self) -> usize {
        if self.s21.is_empty() {
            1
        } else {
            2
        }
    }

    /// Render the file contents
    pub fn format(&self) -> String {
        let mut buf = Vec::new();
        match self.write_to(&mut buf) {
            Ok(()) => String::from_utf8(buf).unwrap_or_default(),
            Err(_) => String::new(),
        }
    }

    /// Write the file contents to any writer
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        for comment in &self.comments {
            writeln!(writer, "! {}", comment)?;
        }
        writeln!(writer, "# HZ S RI R {}", self.impedance)?;

        if self.ports() == 1 {
            for p in &self.s11 {
                writeln!(writer, "{} {} {}", p.freq, p.re, p.im)?;
            }
        } else {
            let rows = self
                .s11
                .iter()
                .zip(&self.s21)
                .zip(&self.s12)
                .zip(&self.s22);
            for (((s11, s21), s12), s22) in rows {
                writeln!(
                    writer,
                    "{} {} {} {} {} {} {} {} {}",
                    s11.freq, s11.re, s11.im, s21.re, s21.im, s12.re, s12.im, s22.re, s22.im
                )?;
            }
        }
        Ok(())
    }

    /// Write to a file, replacing it if present
    pub fn save(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()
    }

    /// Read and parse a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content).map_err(|e| e.with_context(format!("Failed to parse {}", path.display())))
    }

    /// Parse file contents
    pub fn parse(content: &str) -> Result<Self> {
        let mut ts = Self {
            impedance: REFERENCE_IMPEDANCE,
            ..Default::default()
        };
        let mut option: Option<OptionLine> = None;

        for (index, raw) in content.lines().enumerate() {
            let line_no = index + 1;
            let (data, comment) = match raw.split_once('!') {
                Some((data, comment)) => (data, Some(comment.trim())),
                None => (raw, None),
            };
            if let Some(comment) = comment {
                if data.trim().is_empty() {
                    ts.comments.push(comment.to_string());
                }
            }

            let data = data.trim();
            if data.is_empty() {
                continue;
            }

            if let Some(rest) = data.strip_prefix('#') {
                if option.is_some() {
                    tracing::warn!("Ignoring repeated option line {}", line_no);
                    continue;
                }
                let parsed = OptionLine::parse(rest)?;
                ts.impedance = parsed.impedance;
                option = Some(parsed);
                continue;
            }

            let option = option.unwrap_or_default();
            let values = data
                .split_whitespace()
                .map(|v| {
                    v.parse::<f64>().map_err(|_| {
                        VnaError::Touchstone(format!("line {}: invalid number '{}'", line_no, v))
                    })
                })
                .collect::<Result<Vec<f64>>>()?;

            let freq = (values[0] * option.unit.multiplier()).round() as u64;
            let point = |i: usize| {
                Datapoint::from_complex(freq, option.format.to_complex(values[i], values[i + 1]))
            };
            match values.len() {
                3 => ts.s11.push(point(1)),
                9 => {
                    ts.s11.push(point(1));
                    ts.s21.push(point(3));
                    ts.s12.push(point(5));
                    ts.s22.push(point(7));
                }
                n => {
                    return Err(VnaError::Touchstone(format!(
                        "line {}: expected 3 or 9 columns, found {}",
                        line_no, n
                    )))
                }
            }
        }

        Ok(ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Complex64, b: Complex64) -> bool {
        (a - b).norm() < 1e-9
    }

    #[test]
    fn test_one_port_format() {
        let ts = Touchstone::one_port(vec![
            Datapoint::new(1_000_000, 0.5, -0.25),
            Datapoint::new(2_000_000, 0.125, 0.0),
        ]);
        assert_eq!(
            ts.format(),
            "# HZ S RI R 50\n1000000 0.5 -0.25\n2000000 0.125 0\n"
        );
    }

    #[test]
    fn test_two_port_synthesizes_cross_parameters() {
        let s11 = vec![Datapoint::new(1_000_000, 0.5, 0.1)];
        let s21 = vec![Datapoint::new(1_000_000, 0.9, -0.2)];
        let ts = Touchstone::two_port(s11, s21);

        assert_eq!(ts.ports(), 2);
        assert_eq!(ts.s12, vec![Datapoint::new(1_000_000, 0.0, 0.0)]);
        assert_eq!(ts.s22, ts.s12);
        assert_eq!(
            ts.format(),
            format!(
                "! {}\n# HZ S RI R 50\n1000000 0.5 0.1 0.9 -0.2 0 0 0 0\n",
                SYNTHESIZED_NOTE
            )
        );
    }

    #[test]
    fn test_parse_written_file() {
        let original = Touchstone::two_port(
            vec![
                Datapoint::new(1_000_000, 0.123456789, -0.5),
                Datapoint::new(1_500_000, -0.75, 0.333),
            ],
            vec![
                Datapoint::new(1_000_000, 0.9, 0.01),
                Datapoint::new(1_500_000, 0.8, 0.02),
            ],
        );
        let parsed = Touchstone::parse(&original.format()).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_parse_units_and_formats() {
        let text = "! from another tool\n# MHZ S DB R 75\n1.5 -6.0206 90 ! trailing\n";
        let ts = Touchstone::parse(text).unwrap();

        assert_eq!(ts.impedance, 75.0);
        assert_eq!(ts.comments, vec!["from another tool".to_string()]);
        assert_eq!(ts.s11.len(), 1);
        assert_eq!(ts.s11[0].freq, 1_500_000);
        assert!((ts.s11[0].z() - Complex64::new(0.0, 0.5)).norm() < 1e-4);
        assert!(ts.s21.is_empty());
    }

    #[test]
    fn test_parse_defaults_to_ghz_ma() {
        let ts = Touchstone::parse("0.001 0.5 180\n").unwrap();
        assert_eq!(ts.s11[0].freq, 1_000_000);
        assert!((ts.s11[0].z() - Complex64::new(-0.5, 0.0)).norm() < 1e-9);
    }

    #[test]
    fn test_parse_khz_ri() {
        let ts = Touchstone::parse("# KHZ S RI R 50\n100 0.25 0.75\n").unwrap();
        assert_eq!(ts.s11[0].freq, 100_000);
        assert!(approx(ts.s11[0].z(), Complex64::new(0.25, 0.75)));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Touchstone::parse("# HZ S RI R 50\n100 0.25\n"),
            Err(VnaError::Touchstone(_))
        ));
        assert!(matches!(
            Touchstone::parse("# HZ S RI R 50\n100 abc 0.1\n"),
            Err(VnaError::Touchstone(_))
        ));
        assert!(matches!(
            Touchstone::parse("# HZ Y RI R 50\n"),
            Err(VnaError::Touchstone(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.s1p");
        let ts = Touchstone::one_port(vec![Datapoint::new(3_600_000, 0.2, 0.3)]);

        ts.save(&path).unwrap();
        assert_eq!(Touchstone::load(&path).unwrap(), ts);
    }
}
