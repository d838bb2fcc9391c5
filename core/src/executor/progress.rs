// Output marker parsing - turns utility output lines into a step percentage
//
// Multi-pass overwrites report `pass N/M` followed by an optional in-pass
// percentage (shred -v). Everything else is scanned for a bare `NN%`.

use crate::method::StepKind;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref PASS_MARKER: Regex = Regex::new(r"pass\s+(\d+)\s*/\s*(\d+)").expect("valid regex");
    static ref PERCENT_MARKER: Regex =
        Regex::new(r"(\d{1,3}(?:\.\d+)?)\s*%").expect("valid regex");
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressParser {
    Passes { total: u32 },
    Percent,
}

impl ProgressParser {
    pub fn for_kind(kind: &StepKind) -> Self {
        match kind {
            StepKind::Overwrite { passes, .. } => ProgressParser::Passes {
                total: (*passes).max(1),
            },
            _ => ProgressParser::Percent,
        }
    }

    /// Percentage of the whole step implied by one output line, if any
    pub fn parse(&self, line: &str) -> Option<f64> {
        let percent = PERCENT_MARKER
            .captures_iter(line)
            .last()
            .and_then(|c| c[1].parse::<f64>().ok())
            .filter(|p| (0.0..=100.0).contains(p));

        match self {
            ProgressParser::Percent => percent,
            ProgressParser::Passes { total } => {
                let caps = PASS_MARKER.captures(line)?;
                let pass: u32 = caps[1].parse().ok()?;
                let reported_total: u32 = caps[2].parse().ok()?;
                let total = if reported_total > 0 { reported_total } else { *total };
                if pass == 0 || pass > total {
                    return None;
                }
                let within = percent.unwrap_or(0.0) / 100.0;
                Some(((pass - 1) as f64 + within) / total as f64 * 100.0)
            }
        }
    }
}

/// Keeps the reported percentage monotonically non-decreasing
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    parser: ProgressParser,
    current: u8,
}

impl ProgressTracker {
    pub fn new(parser: ProgressParser) -> Self {
        Self { parser, current: 0 }
    }

    pub fn current(&self) -> u8 {
        self.current
    }

    /// Feed one line; returns the new percentage when it advanced
    pub fn observe(&mut self, line: &str) -> Option<u8> {
        let parsed = self.parser.parse(line)?;
        let pct = parsed.floor().clamp(0.0, 100.0) as u8;
        if pct > self.current {
            self.current = pct;
            Some(pct)
        } else {
            None
        }
    }

    pub fn complete(&mut self) -> u8 {
        self.current = 100;
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shred_parser() -> ProgressParser {
        ProgressParser::for_kind(&StepKind::Overwrite {
            passes: 4,
            zero_final: true,
        })
    }

    #[test]
    fn test_shred_pass_markers() {
        let parser = shred_parser();
        assert_eq!(
            parser.parse("shred: /dev/sdb: pass 1/4 (random)..."),
            Some(0.0)
        );
        assert_eq!(
            parser.parse("shred: /dev/sdb: pass 2/4 (random)...512MiB/1.0GiB 50%"),
            Some(37.5)
        );
        assert_eq!(
            parser.parse("shred: /dev/sdb: pass 4/4 (000000)...1.0GiB/1.0GiB 100%"),
            Some(100.0)
        );
    }

    #[test]
    fn test_pass_parser_ignores_unrelated_lines() {
        let parser = shred_parser();
        assert_eq!(parser.parse("shred: /dev/sdb: removing"), None);
        assert_eq!(parser.parse("pass 0/4"), None);
        assert_eq!(parser.parse("pass 9/4"), None);
    }

    #[test]
    fn test_percent_parser() {
        let parser = ProgressParser::for_kind(&StepKind::CryptoErase);
        assert_eq!(parser.parse("Sanitize progress: 45%"), Some(45.0));
        assert_eq!(parser.parse("progress 12.5 %"), Some(12.5));
        assert_eq!(parser.parse("no marker here"), None);
        assert_eq!(parser.parse("bogus 250%"), None);
    }

    #[test]
    fn test_tracker_is_monotonic() {
        let mut tracker = ProgressTracker::new(ProgressParser::Percent);
        assert_eq!(tracker.observe("10%"), Some(10));
        assert_eq!(tracker.observe("5%"), None);
        assert_eq!(tracker.current(), 10);
        assert_eq!(tracker.observe("10%"), None);
        assert_eq!(tracker.observe("55%"), Some(55));
        assert_eq!(tracker.complete(), 100);
    }

    #[test]
    fn test_tracker_across_passes() {
        let mut tracker = ProgressTracker::new(shred_parser());
        assert_eq!(tracker.observe("pass 1/4 (random)...100%"), Some(25));
        // next pass restarts its own percentage but overall keeps rising
        assert_eq!(tracker.observe("pass 2/4 (random)...0%"), None);
        assert_eq!(tracker.observe("pass 2/4 (random)...50%"), Some(37));
    }
}
