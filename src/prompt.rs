//! Console prompts for role selection and ISO settings
//!
//! Generic over the reader and writer so tests can script the answers.
//! Numbers accept decimal or `0x`-prefixed hex; an empty answer picks the
//! default. Unparsable input asks again, out-of-range input rejects the
//! whole change.

use isobench_core::config::qos::{
    INTERVAL_US_MAX, INTERVAL_US_MIN, LATENCY_MS_MAX, RTN_MAX, SDU_MAX, SDU_MIN,
};
use isobench_core::{BenchConfig, ConfigError, Phy, QosConfig, Role, TransportLimits};
use std::io::{self, BufRead, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PromptError {
    #[error("Console I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("Input closed")]
    Closed,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Parse a decimal or `0x` hex number
pub fn parse_number(input: &str) -> Option<u64> {
    let input = input.trim();
    match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => input.parse().ok(),
    }
}

/// Line-oriented prompter
pub struct Prompter<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn ask(&mut self, question: &str) -> Result<String, PromptError> {
        write!(self.output, "{}", question)?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(PromptError::Closed);
        }
        Ok(line.trim().to_string())
    }

    /// Yes/no question; empty input picks `default`
    pub fn confirm(&mut self, question: &str, default: bool) -> Result<bool, PromptError> {
        let hint = if default { "(Y/n)" } else { "(y/N)" };
        loop {
            let answer = self.ask(&format!("{} {}? ", question, hint))?;
            match answer.to_ascii_lowercase().as_str() {
                "" => return Ok(default),
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => writeln!(self.output, "Please answer y or n")?,
            }
        }
    }

    /// Numeric field with bounds
    ///
    /// # Arguments
    /// * `field` - Name used in the range error
    /// * `label` - Text shown to the user
    /// * `current` - Value shown as current
    /// * `default` - Value used for empty input
    /// * `min`, `max` - Accepted range (inclusive)
    pub fn number(
        &mut self,
        field: &'static str,
        label: &str,
        current: u64,
        default: u64,
        min: u64,
        max: u64,
    ) -> Result<u64, PromptError> {
        loop {
            let answer = self.ask(&format!(
                "Set {} (current {}, default {}): ",
                label, current, default
            ))?;
            if answer.is_empty() {
                return Ok(default);
            }
            match parse_number(&answer) {
                Some(value) if (min..=max).contains(&value) => return Ok(value),
                Some(value) => {
                    return Err(ConfigError::OutOfRange {
                        field,
                        value,
                        min,
                        max,
                    }
                    .into())
                }
                None => writeln!(self.output, "Could not parse '{}' as a number", answer)?,
            }
        }
    }

    /// Ask for the role of the next pass
    ///
    /// # Returns
    /// None when the user chooses to quit or input is closed
    pub fn select_role(&mut self) -> Result<Option<Role>, PromptError> {
        loop {
            let answer = match self
                .ask("Choose device role - type c (initiator), p (responder) or q to quit: ")
            {
                Ok(answer) => answer,
                Err(PromptError::Closed) => return Ok(None),
                Err(e) => return Err(e),
            };
            if answer.eq_ignore_ascii_case("q") {
                return Ok(None);
            }
            match answer.parse::<Role>() {
                Ok(role) => return Ok(Some(role)),
                Err(_) => writeln!(self.output, "Invalid role: {}", answer)?,
            }
        }
    }

    /// Prompt every QoS field of one direction
    fn edit_qos(
        &mut self,
        direction: &str,
        current: QosConfig,
        limits: &TransportLimits,
    ) -> Result<QosConfig, PromptError> {
        let defaults = QosConfig {
            sdu: limits.tx_mtu.min(SDU_MAX),
            ..Default::default()
        };
        let (rtn_field, interval_field, latency_field, sdu_field) = match direction {
            "TX" => ("tx.rtn", "tx.interval_us", "tx.latency_ms", "tx.sdu"),
            _ => ("rx.rtn", "rx.interval_us", "rx.latency_ms", "rx.sdu"),
        };

        let rtn = self.number(
            rtn_field,
            &format!("{} RTN", direction),
            current.rtn as u64,
            defaults.rtn as u64,
            0,
            RTN_MAX as u64,
        )?;
        let interval_us = self.number(
            interval_field,
            &format!("{} interval (us)", direction),
            current.interval_us as u64,
            defaults.interval_us as u64,
            INTERVAL_US_MIN as u64,
            INTERVAL_US_MAX as u64,
        )?;
        let latency_ms = self.number(
            latency_field,
            &format!("{} latency (ms)", direction),
            current.latency_ms as u64,
            defaults.latency_ms as u64,
            0,
            LATENCY_MS_MAX as u64,
        )?;
        let phy = loop {
            let answer = self.ask(&format!(
                "Set {} PHY - 1 (1M), 2 (2M) or 4 (Coded) (current {}, default {}): ",
                direction, current.phy, defaults.phy
            ))?;
            if answer.is_empty() {
                break defaults.phy;
            }
            match parse_number(&answer) {
                Some(code) => break Phy::from_code(code)?,
                None => writeln!(self.output, "Could not parse '{}' as a number", answer)?,
            }
        };
        let sdu = self.number(
            sdu_field,
            &format!("{} SDU (bytes)", direction),
            current.sdu as u64,
            defaults.sdu as u64,
            SDU_MIN as u64,
            SDU_MAX.min(limits.tx_mtu) as u64,
        )?;

        Ok(QosConfig {
            rtn: rtn as u8,
            interval_us: interval_us as u32,
            latency_ms: latency_ms as u16,
            phy,
            sdu: sdu as u16,
        })
    }

    /// Offer to change the benchmark settings
    ///
    /// # Returns
    /// None if the user keeps the current settings, otherwise the validated
    /// new configuration
    pub fn edit_bench(
        &mut self,
        current: &BenchConfig,
        limits: &TransportLimits,
    ) -> Result<Option<BenchConfig>, PromptError> {
        if !self.confirm("Change ISO settings", false)? {
            return Ok(None);
        }

        let mut next = current.clone();

        if self.confirm("Change TX settings", false)? {
            let base = current.tx.unwrap_or_default();
            next.tx = Some(self.edit_qos("TX", base, limits)?);
        }
        if self.confirm("Disable TX", false)? {
            next.tx = None;
        }

        if self.confirm("Change RX settings", false)? {
            if next.tx.is_some() && self.confirm("Set RX settings to TX settings", true)? {
                next.mirror_tx_to_rx();
            } else {
                let base = current.rx.unwrap_or_default();
                next.rx = Some(self.edit_qos("RX", base, limits)?);
            }
        }
        if self.confirm("Disable RX", false)? {
            next.rx = None;
        }

        let count = self.number(
            "stream_count",
            "number of streams",
            current.stream_count as u64,
            limits.max_streams as u64,
            1,
            limits.max_streams as u64,
        )?;
        next.stream_count = count as usize;

        Ok(Some(next.validate(limits)?))
    }
}
