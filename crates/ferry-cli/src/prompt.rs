//! Operator prompts.
//!
//! Confirmations and instance picking go through dialoguer. `--yes` answers
//! every confirmation with yes; without a terminal, confirmations are
//! declined instead of blocking.

use std::io::{self, Write};

use anyhow::Result;
use console::style;
use dialoguer::{Confirm, Select, theme::ColorfulTheme};

use ferry_core::inventory::InstanceSummary;

pub struct Prompter<W: Write = io::Stdout> {
    yes: bool,
    interactive: bool,
    writer: W,
    theme: ColorfulTheme,
}

impl Prompter<io::Stdout> {
    pub fn new(yes: bool) -> Self {
        Self {
            yes,
            interactive: console::Term::stderr().is_term(),
            writer: io::stdout(),
            theme: ColorfulTheme::default(),
        }
    }
}

impl<W: Write> Prompter<W> {
    #[cfg(test)]
    pub fn with_writer(yes: bool, interactive: bool, writer: W) -> Self {
        Self {
            yes,
            interactive,
            writer,
            theme: ColorfulTheme::default(),
        }
    }

    /// Ask a yes/no question. Never blocks without a terminal.
    pub fn confirm(&mut self, question: &str, default: bool) -> Result<bool> {
        if self.yes {
            writeln!(self.writer, "{} {}", style("✓").green(), question)?;
            return Ok(true);
        }
        if !self.interactive {
            writeln!(
                self.writer,
                "{} {} (no terminal; pass --yes to accept)",
                style("✗").yellow(),
                question
            )?;
            return Ok(false);
        }
        let answer = Confirm::with_theme(&self.theme)
            .with_prompt(question)
            .default(default)
            .interact()?;
        Ok(answer)
    }

    /// Pick one instance from a listing; `None` when the listing is empty.
    pub fn pick_instance(&mut self, instances: &[InstanceSummary]) -> Result<Option<usize>> {
        match instances.len() {
            0 => return Ok(None),
            1 => return Ok(Some(0)),
            _ => {}
        }
        if !self.interactive {
            anyhow::bail!("Several instances found; pass an instance id to `ferry select`");
        }
        let items: Vec<String> = instances
            .iter()
            .map(|i| {
                let label = if i.label.is_empty() { "-" } else { i.label.as_str() };
                format!("{:<38} {:<20} {:<16} {}", i.id, label, i.primary_ip, i.status)
            })
            .collect();
        let selection = Select::with_theme(&self.theme)
            .with_prompt("Select an instance")
            .items(&items)
            .default(0)
            .interact()?;
        Ok(Some(selection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: &str) -> InstanceSummary {
        InstanceSummary {
            id: id.to_string(),
            label: String::new(),
            primary_ip: "10.0.0.1".to_string(),
            status: "active".to_string(),
            power_status: "running".to_string(),
            region: "ewr".to_string(),
            plan: "vc2".to_string(),
        }
    }

    #[test]
    fn yes_flag_confirms_without_prompting() {
        let mut out = Vec::new();
        let mut prompter = Prompter::with_writer(true, false, &mut out);
        assert!(prompter.confirm("Purge remote outputs?", false).unwrap());
        assert!(String::from_utf8(out).unwrap().contains("Purge remote outputs?"));
    }

    #[test]
    fn no_terminal_declines() {
        let mut out = Vec::new();
        let mut prompter = Prompter::with_writer(false, false, &mut out);
        assert!(!prompter.confirm("Install rsync?", true).unwrap());
        assert!(String::from_utf8(out).unwrap().contains("--yes"));
    }

    #[test]
    fn single_instance_is_picked_directly() {
        let mut prompter = Prompter::with_writer(false, false, Vec::new());
        assert_eq!(prompter.pick_instance(&[summary("a")]).unwrap(), Some(0));
        assert_eq!(prompter.pick_instance(&[]).unwrap(), None);
        assert!(prompter.pick_instance(&[summary("a"), summary("b")]).is_err());
    }
}
