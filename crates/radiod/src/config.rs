// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 radiod contributors

//! Configuration: INI file/directory loading, typed section access,
//! frequency parsing and the process-wide constants.
//!
//! A config target may be a single file or a directory of `*.conf`
//! fragments concatenated in sorted order (sections may be split across
//! fragments). Section and key lookups are case-insensitive; later
//! duplicate keys override earlier ones.

use log::warn;
use std::fs;
use std::path::Path;
use thiserror::Error;

// sysexits.h exit codes used by the daemon
pub const EX_USAGE: i32 = 64;
pub const EX_NOINPUT: i32 = 66;
pub const EX_NOHOST: i32 = 68;
pub const EX_UNAVAILABLE: i32 = 69;

/// Expedited Forwarding DSCP, as an IP TOS byte.
pub const DEFAULT_IP_TOS: u32 = 46 << 2;
pub const DEFAULT_BLOCKTIME: f64 = 0.020;
pub const DEFAULT_OVERLAP: usize = 5;
/// Status update cadence in blocks: 2 Hz at 20 ms blocks.
pub const DEFAULT_UPDATE: u32 = 25;
/// Idle channels tuned to 0 Hz live this long, seconds.
pub const DEFAULT_LIFETIME: f64 = 20.0;
/// Channel table capacity.
pub const NCHANNELS: usize = 1500;
pub const GLOBAL: &str = "global";
pub const DEFAULT_PRESET: &str = "am";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't read config {0}: {1}")]
    Io(String, std::io::Error),
    #[error("{0} is not a config file or directory")]
    NotFound(String),
    #[error("empty config directory {0}")]
    EmptyDir(String),
    #[error("config line {0}: '{1}' is not 'key = value'")]
    BadLine(usize, String),
    #[error("[{section}] unknown key '{key}'")]
    UnknownKey { section: String, key: String },
    #[error("missing required 'hardware =' in [global]")]
    NoHardware,
    #[error("no hardware section [{0}] found")]
    NoHardwareSection(String),
    #[error("duplicate status/data stream names: {0}")]
    DuplicateStreams(String),
}

/// One `[section]` worth of key/value pairs, insertion-ordered.
#[derive(Debug, Clone, Default)]
pub struct ConfigSection {
    entries: Vec<(String, String)>,
}

impl ConfigSection {
    pub fn insert(&mut self, key: &str, value: &str) {
        self.entries
            .push((key.to_ascii_lowercase(), value.to_string()));
    }

    /// Latest value for `key`, case-insensitive.
    pub fn get(&self, key: &str) -> Option<&str> {
        let key = key.to_ascii_lowercase();
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key).map(str::trim) {
            Some(v) => matches!(
                v.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on" | "y"
            ),
            None => default,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

/// A parsed config file: ordered named sections.
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    sections: Vec<(String, ConfigSection)>,
}

impl ConfigFile {
    /// Load from a file, a directory, or `<path>.d`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = if path.is_file() {
            fs::read_to_string(path)
                .map_err(|e| ConfigError::Io(path.display().to_string(), e))?
        } else if path.is_dir() {
            Self::concat_dir(path)?
        } else {
            let dotd = path.with_extension("d");
            if dotd.is_dir() {
                Self::concat_dir(&dotd)?
            } else {
                return Err(ConfigError::NotFound(path.display().to_string()));
            }
        };
        Self::parse(&text)
    }

    fn concat_dir(dir: &Path) -> Result<String, ConfigError> {
        let mut names: Vec<_> = fs::read_dir(dir)
            .map_err(|e| ConfigError::Io(dir.display().to_string(), e))?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|x| x == "conf"))
            .collect();
        if names.is_empty() {
            return Err(ConfigError::EmptyDir(dir.display().to_string()));
        }
        names.sort();
        let mut text = String::new();
        for p in names {
            text.push_str(
                &fs::read_to_string(&p).map_err(|e| ConfigError::Io(p.display().to_string(), e))?,
            );
            text.push('\n');
        }
        Ok(text)
    }

    /// Parse INI text. `#` and `;` start comments; blank lines ignored.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut cfg = ConfigFile::default();
        let mut current: Option<usize> = None;
        for (lineno, raw) in text.lines().enumerate() {
            let line = match raw.find(['#', ';']) {
                Some(pos) => &raw[..pos],
                None => raw,
            }
            .trim();
            if line.is_empty() {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let name = name.trim().to_ascii_lowercase();
                current = Some(match cfg.position(&name) {
                    Some(i) => i, // sections may be split across fragments
                    None => {
                        cfg.sections.push((name, ConfigSection::default()));
                        cfg.sections.len() - 1
                    }
                });
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::BadLine(lineno + 1, raw.to_string()));
            };
            let Some(idx) = current else {
                return Err(ConfigError::BadLine(lineno + 1, raw.to_string()));
            };
            cfg.sections[idx].1.insert(key.trim(), value.trim());
        }
        Ok(cfg)
    }

    fn position(&self, name: &str) -> Option<usize> {
        let name = name.to_ascii_lowercase();
        self.sections.iter().position(|(n, _)| *n == name)
    }

    pub fn section(&self, name: &str) -> Option<&ConfigSection> {
        self.position(name).map(|i| &self.sections[i].1)
    }

    pub fn sections(&self) -> impl Iterator<Item = (&str, &ConfigSection)> {
        self.sections.iter().map(|(n, s)| (n.as_str(), s))
    }

    /// Check a section against a list of valid keys.
    ///
    /// `fatal` returns the first offender as an error; otherwise unknown
    /// keys only warn (channel sections share keys with presets, so
    /// strictness there causes more harm than good).
    pub fn validate_section(
        &self,
        name: &str,
        valid: &[&[&str]],
        fatal: bool,
    ) -> Result<(), ConfigError> {
        let Some(section) = self.section(name) else {
            return Ok(());
        };
        for key in section.keys() {
            let known = valid.iter().any(|list| {
                list.iter()
                    .any(|v| v.eq_ignore_ascii_case(key) || key.starts_with(v))
            });
            if !known {
                if fatal {
                    return Err(ConfigError::UnknownKey {
                        section: name.to_string(),
                        key: key.to_string(),
                    });
                }
                warn!("[config] [{name}] unrecognized key '{key}'");
            }
        }
        Ok(())
    }
}

/// Valid keys in [global].
pub const GLOBAL_KEYS: &[&str] = &[
    "affinity",
    "blocktime",
    "data",
    "description",
    "dns",
    "fft-plan-level",
    "fft-internal-threads",
    "fft-threads",
    "hardware",
    "iface",
    "mode-file",
    "mode",
    "overlap",
    "preset",
    "presets-file",
    "rtcp",
    "sap",
    "static",
    "status",
    "tos",
    "ttl",
    "update",
    "verbose",
    "wisdom-file",
];

/// Valid keys in channel sections and preset entries. Numbered variants
/// (freq0..freq9 etc) match by prefix.
pub const CHANNEL_KEYS: &[&str] = &[
    "agc",
    "bin-bw",
    "bin-count",
    "blocking",
    "channels",
    "conj",
    "crossover",
    "ctcss",
    "data",
    "deemph-gain",
    "deemph-tc",
    "demod",
    "disable",
    "dns",
    "encoding",
    "envelope",
    "except",
    "extend",
    "filter2",
    "filter2-beta",
    "freq",
    "gain",
    "hang-time",
    "headroom",
    "high",
    "iface",
    "kaiser-beta",
    "low",
    "minpacket",
    "mode",
    "mono",
    "opus-application",
    "opus-bitrate",
    "opus-dtx",
    "opus-fec",
    "pacing",
    "pl",
    "pll",
    "pll-bw",
    "preset",
    "raster",
    "recovery-rate",
    "samprate",
    "shift",
    "spectrum-window",
    "square",
    "squelch-open",
    "squelch-close",
    "squelch-tail",
    "squelchtail",
    "ssrc",
    "stereo",
    "threshold",
    "threshold-extend",
    "tone",
    "ttl",
    "update",
    "window-shape",
];

/// Parse a frequency with optional scale suffix.
///
/// `7050k`, `14.074m`, `1g296` style suffixes scale by 1e3/1e6/1e9. Bare
/// numbers use a heuristic when `heuristic` is set: values below 100 read
/// as MHz, below 100000 as kHz, otherwise Hz. Returns a negative value on
/// parse failure so callers can log and skip.
pub fn parse_frequency(s: &str, heuristic: bool) -> f64 {
    let s = s.trim();
    if s.is_empty() {
        return -1.0;
    }
    let lower = s.to_ascii_lowercase();
    // Suffix or infix scale marker: 7050k, 7k050, 14.074m
    for (ch, scale) in [('g', 1e9), ('m', 1e6), ('k', 1e3), ('h', 1.0)] {
        if let Some(pos) = lower.find(ch) {
            let (int_part, frac_part) = lower.split_at(pos);
            let frac_part = &frac_part[1..];
            let int_val: f64 = if int_part.is_empty() {
                0.0
            } else {
                match int_part.parse() {
                    Ok(v) => v,
                    Err(_) => return -1.0,
                }
            };
            if frac_part.is_empty() {
                return int_val * scale;
            }
            // Infix digit form: the marker doubles as the decimal point
            let Ok(frac_digits) = frac_part.parse::<u64>() else {
                return -1.0;
            };
            let frac = frac_digits as f64 / 10f64.powi(frac_part.len() as i32);
            return (int_val + frac) * scale;
        }
    }
    let Ok(v) = lower.parse::<f64>() else {
        return -1.0;
    };
    if v < 0.0 {
        return -1.0;
    }
    if !heuristic || v == 0.0 {
        return v;
    }
    if v < 100.0 {
        v * 1e6
    } else if v < 100_000.0 {
        v * 1e3
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sections_and_keys() {
        let cfg = ConfigFile::parse(
            "[global]\nhardware = rig\nblocktime = 20 ; ms\n\n[rig]\ndevice = synth\n# comment\n[ch]\nfreq = 7050k\n",
        )
        .expect("parse");
        assert_eq!(cfg.section("global").and_then(|s| s.get("hardware")), Some("rig"));
        assert_eq!(cfg.section("GLOBAL").and_then(|s| s.get("BLOCKTIME")), Some("20"));
        assert_eq!(cfg.section("ch").and_then(|s| s.get("freq")), Some("7050k"));
        assert!(cfg.section("nope").is_none());
    }

    #[test]
    fn split_sections_merge() {
        let cfg =
            ConfigFile::parse("[a]\nx = 1\n[b]\ny = 2\n[a]\nz = 3\nx = 9\n").expect("parse");
        let a = cfg.section("a").expect("a");
        assert_eq!(a.get("z"), Some("3"));
        assert_eq!(a.get("x"), Some("9")); // later duplicate wins
    }

    #[test]
    fn bad_lines_error() {
        assert!(ConfigFile::parse("[a]\nnot a kv pair\n").is_err());
        assert!(ConfigFile::parse("orphan = 1\n").is_err());
    }

    #[test]
    fn bool_parsing() {
        let cfg = ConfigFile::parse("[a]\np = yes\nq = 0\nr = ON\n").expect("parse");
        let a = cfg.section("a").expect("a");
        assert!(a.get_bool("p", false));
        assert!(!a.get_bool("q", true));
        assert!(a.get_bool("r", false));
        assert!(a.get_bool("missing", true));
    }

    #[test]
    fn frequency_suffixes() {
        assert_eq!(parse_frequency("7050000", true), 7_050_000.0);
        assert_eq!(parse_frequency("7050k", true), 7_050_000.0);
        assert_eq!(parse_frequency("14.074m", true), 14_074_000.0);
        assert_eq!(parse_frequency("7m050", true), 7_050_000.0);
        assert_eq!(parse_frequency("1g296", true), 1_296_000_000.0);
        assert_eq!(parse_frequency("750h", true), 750.0);
    }

    #[test]
    fn frequency_heuristic() {
        assert_eq!(parse_frequency("7.05", true), 7_050_000.0); // MHz
        assert_eq!(parse_frequency("7050", true), 7_050_000.0); // kHz
        assert_eq!(parse_frequency("144900", true), 144_900.0); // Hz
        assert_eq!(parse_frequency("7050", false), 7050.0); // no heuristic
    }

    #[test]
    fn frequency_errors_are_negative() {
        assert!(parse_frequency("", true) < 0.0);
        assert!(parse_frequency("abc", true) < 0.0);
        assert!(parse_frequency("-5", true) < 0.0);
    }

    #[test]
    fn key_validation() {
        let cfg = ConfigFile::parse("[global]\nhardware = x\nbogus-key = 1\n").expect("parse");
        assert!(cfg
            .validate_section("global", &[GLOBAL_KEYS], true)
            .is_err());
        let cfg = ConfigFile::parse("[global]\nhardware = x\nttl = 1\n").expect("parse");
        assert!(cfg.validate_section("global", &[GLOBAL_KEYS], true).is_ok());
    }

    #[test]
    fn numbered_channel_keys_match_by_prefix() {
        let cfg =
            ConfigFile::parse("[ch]\nfreq0 = 7050k\nraster3 = 100k 200k 10k\nexcept1 = 150k\n")
                .expect("parse");
        assert!(cfg.validate_section("ch", &[CHANNEL_KEYS], true).is_ok());
    }

    #[test]
    fn load_directory_fragments() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("10-global.conf"), "[global]\nhardware = rig\n")
            .expect("write");
        fs::write(dir.path().join("20-rig.conf"), "[rig]\ndevice = synth\n").expect("write");
        fs::write(dir.path().join("ignored.txt"), "[junk\n").expect("write");
        let cfg = ConfigFile::load(dir.path()).expect("load");
        assert!(cfg.section("rig").is_some());
        assert!(cfg.section("junk").is_none());
    }
}
