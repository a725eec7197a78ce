use std::{
    collections::VecDeque,
    io::{self, BufRead},
};

use console::{Term, style};
use tracing::warn;

/// Source of operator answers.
///
/// Implementations must return an error instead of an empty answer once input
/// is exhausted, otherwise [`confirm`] would ask forever.
pub trait Prompt: Send {
    /// Show `question` and read one line of input.
    fn ask(&mut self, question: &str) -> io::Result<String>;

    /// Show an informational message.
    fn say(&mut self, message: &str);
}

/// Interactive prompt on the controlling terminal.
pub struct TermPrompt {
    term: Term,
}

impl TermPrompt {
    pub fn new() -> Self {
        Self {
            term: Term::stdout(),
        }
    }
}

impl Default for TermPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompt for TermPrompt {
    fn ask(&mut self, question: &str) -> io::Result<String> {
        self.term.write_str(&format!("{} ", style(question).cyan()))?;
        self.term.flush()?;

        let mut input = String::new();
        if io::stdin().lock().read_line(&mut input)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "standard input closed",
            ));
        }
        Ok(input.trim_end_matches(['\r', '\n']).to_string())
    }

    fn say(&mut self, message: &str) {
        let _ = self.term.write_line(message);
    }
}

/// Prompt fed from a fixed list of answers. Runs out with `UnexpectedEof`.
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    answers: VecDeque<String>,
    /// Every question asked, in order.
    pub asked: Vec<String>,
    /// Every message shown, in order.
    pub said: Vec<String>,
}

impl ScriptedPrompt {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            asked: Vec::new(),
            said: Vec::new(),
        }
    }
}

impl Prompt for ScriptedPrompt {
    fn ask(&mut self, question: &str) -> io::Result<String> {
        self.asked.push(question.to_string());
        self.answers
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no scripted answer left"))
    }

    fn say(&mut self, message: &str) {
        self.said.push(message.to_string());
    }
}

/// Ask a yes/no question until the answer contains a `y` or an `n`.
///
/// Matching is case-insensitive and checks for `y` first, so `"yes"` and `"Y"`
/// are yes while `"no"` and `"nope"` are no.
pub fn confirm(prompt: &mut dyn Prompt, question: &str) -> io::Result<bool> {
    loop {
        let selection = prompt.ask(question)?.trim().to_lowercase();
        if selection.contains('y') {
            return Ok(true);
        }
        if selection.contains('n') {
            return Ok(false);
        }
        warn!("Invalid selection '{selection}'. Please try again or exit via Ctrl-C.");
    }
}

/// Interaction mode of the workflow and the prompt used when interactive.
pub struct Operator {
    interactive: bool,
    prompt: Box<dyn Prompt>,
}

impl Operator {
    pub fn new(interactive: bool, prompt: Box<dyn Prompt>) -> Self {
        Self {
            interactive,
            prompt,
        }
    }

    /// Non-interactive operator; nothing is ever asked.
    pub fn unattended() -> Self {
        Self::new(false, Box::new(ScriptedPrompt::default()))
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }

    pub fn prompt(&mut self) -> &mut dyn Prompt {
        self.prompt.as_mut()
    }

    pub fn confirm(&mut self, question: &str) -> io::Result<bool> {
        confirm(self.prompt.as_mut(), question)
    }
}
