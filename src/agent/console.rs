//! Terminal rendering of a conversation

use std::io::{self, Write};

use crate::sandbox::ExecutionResult;

const RULE_WIDTH: usize = 70;

fn rule(c: char) -> String {
    std::iter::repeat(c).take(RULE_WIDTH).collect()
}

pub fn banner<W: Write>(out: &mut W, lines: &[(&str, String)]) -> io::Result<()> {
    writeln!(out, "\n{}", rule('='))?;
    writeln!(out, "CODE EXECUTION AGENT")?;
    writeln!(out, "{}", rule('='))?;
    for (label, value) in lines {
        writeln!(out, "  {:<14} {}", format!("{}:", label), value)?;
    }
    writeln!(out, "{}", rule('='))?;
    writeln!(out, "\nExamples:")?;
    writeln!(out, "  - Calculate the first 10 Fibonacci numbers")?;
    writeln!(out, "  - Create a bar chart of [1, 4, 9, 16, 25]")?;
    writeln!(out, "  - Generate 100 random numbers and find their mean\n")?;
    writeln!(out, "Type 'quit' or 'exit' to end the session\n")?;
    writeln!(out, "{}\n", rule('='))
}

pub fn vertex_init<W: Write>(out: &mut W, project: &str, location: &str) -> io::Result<()> {
    writeln!(out, "\nInitializing Vertex AI...")?;
    writeln!(out, "  Project: {}", project)?;
    writeln!(out, "  Location: {}", location)?;
    out.flush()
}

pub fn vertex_ready<W: Write>(out: &mut W) -> io::Result<()> {
    writeln!(out, "Vertex AI initialized")
}

pub fn input_prompt<W: Write>(out: &mut W) -> io::Result<()> {
    write!(out, "You: ")?;
    out.flush()
}

pub fn thinking<W: Write>(out: &mut W, model: &str) -> io::Result<()> {
    writeln!(out, "\n{} is thinking...\n", model)?;
    out.flush()
}

pub fn assistant<W: Write>(out: &mut W, text: &str) -> io::Result<()> {
    writeln!(out, "Agent: {}\n", text.trim_end())
}

pub fn model_error<W: Write>(out: &mut W, error: &str) -> io::Result<()> {
    writeln!(out, "\nError calling model: {}\n", error)
}

pub fn blocks_found<W: Write>(out: &mut W, count: usize) -> io::Result<()> {
    writeln!(out, "{}", rule('─'))?;
    writeln!(out, "Found {} code block(s) to execute", count)?;
    writeln!(out, "{}", rule('─'))
}

pub fn executing<W: Write>(out: &mut W, index: usize, total: usize, code: &str) -> io::Result<()> {
    writeln!(out, "\nExecuting code block {}/{}...", index, total)?;
    writeln!(out, "┌─────────────────────────────────────────")?;
    for line in code.lines() {
        writeln!(out, "│ {}", line)?;
    }
    writeln!(out, "└─────────────────────────────────────────")?;
    out.flush()
}

pub fn execution_result<W: Write>(out: &mut W, result: &ExecutionResult) -> io::Result<()> {
    if !result.stdout.is_empty() {
        writeln!(out, "Output:")?;
        writeln!(out, "{}", result.stdout.trim_end())?;
    }
    if !result.stderr.is_empty() {
        writeln!(out, "\nWarnings:")?;
        writeln!(out, "{}", result.stderr.trim_end())?;
    }
    match &result.error {
        Some(error) if result.stdout.is_empty() && result.stderr.is_empty() && !result.success => {
            writeln!(out, "Error: {}", error.trim_end())?;
        }
        Some(error) => {
            writeln!(out, "\nError:")?;
            writeln!(out, "{}", error.trim_end())?;
        }
        None if result.stdout.is_empty() && result.stderr.is_empty() => {
            writeln!(out, "(no output)")?;
        }
        None => {}
    }
    Ok(())
}

pub fn blocks_done<W: Write>(out: &mut W) -> io::Result<()> {
    writeln!(out, "\n{}\n", rule('─'))
}

pub fn repairing<W: Write>(out: &mut W, round: usize, max: usize) -> io::Result<()> {
    writeln!(
        out,
        "Sending error back to the model for debugging (attempt {}/{})...",
        round, max
    )
}

pub fn goodbye<W: Write>(out: &mut W) -> io::Result<()> {
    writeln!(out, "\nGoodbye!")
}
