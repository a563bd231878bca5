//! Render surface for the panel.
//!
//! The e-ink driver itself lives outside this crate; the poll loop hands it a
//! [`Frame`] each tick through the [`Panel`] trait. [`TextPanel`] draws the
//! same layout as text, which is what the binary uses on a terminal.

use std::io::Write;

use anyhow::{Context, Result};

use crate::clock::LocalClock;
use crate::suggestion::{Phrasebook, Recommendation};

/// Character width of the text rendition (296 px panel, 8 px glyphs)
pub const PANEL_COLUMNS: usize = 37;

/// Everything drawn in one refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub date_label: String,
    pub time_label: String,
    pub window_message: String,
    pub start_message: String,
    pub imperative_label: String,
}

impl Frame {
    pub fn compose(clock: &LocalClock, recommendation: &Recommendation, phrasebook: &Phrasebook) -> Self {
        Self {
            date_label: format!(
                "{} {} {}",
                phrasebook.weekday_name(clock.weekday),
                clock.day,
                phrasebook.month_name(clock.month)
            ),
            time_label: format!("{:02}:{:02}", clock.hour, clock.minute),
            window_message: recommendation.window_message.clone(),
            start_message: recommendation.start_message.clone(),
            imperative_label: phrasebook
                .imperative_label(&recommendation.start_message)
                .to_string(),
        }
    }

    /// Header line: date on the left, time flush right
    pub fn header(&self, columns: usize) -> String {
        let used = self.date_label.chars().count() + self.time_label.chars().count();
        let gap = columns.saturating_sub(used).max(1);
        format!("{}{}{}", self.date_label, " ".repeat(gap), self.time_label)
    }
}

pub trait Panel {
    fn render(&mut self, frame: &Frame) -> Result<()>;
}

/// Text rendition of the panel layout on any writer
pub struct TextPanel<W: Write> {
    out: W,
}

impl<W: Write> TextPanel<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn get_ref(&self) -> &W {
        &self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Panel for TextPanel<W> {
    fn render(&mut self, frame: &Frame) -> Result<()> {
        let rule = "=".repeat(PANEL_COLUMNS);
        writeln!(self.out, "{}", rule).context("Failed to write panel")?;
        writeln!(self.out, "{}", frame.header(PANEL_COLUMNS)).context("Failed to write panel")?;
        writeln!(self.out, "{}", rule).context("Failed to write panel")?;
        writeln!(self.out, "  {}", frame.window_message).context("Failed to write panel")?;
        writeln!(self.out, "  {}", frame.imperative_label).context("Failed to write panel")?;
        writeln!(self.out, "  {}", frame.start_message).context("Failed to write panel")?;
        self.out.flush().context("Failed to flush panel")?;
        Ok(())
    }
}
