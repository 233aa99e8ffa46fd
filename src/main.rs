// cfront: C AST parser + preprocessor CLI

use std::fs::File;
use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use cfront::output;
use cfront::Session;

#[derive(Parser, Debug)]
#[command(
    name = "cfront",
    version,
    about = "C front end: preprocess and parse C sources, dump tokens, AST or JSON"
)]
struct Cli {
    /// Input files; `-` reads from stdin.
    #[arg(value_name = "FILE", required = true)]
    inputs: Vec<String>,

    /// Add a directory to the user include search path.
    #[arg(short = 'I', value_name = "PATH")]
    include: Vec<String>,

    /// Add a directory to the system include search path.
    #[arg(long = "isystem", value_name = "PATH")]
    isystem: Vec<String>,

    /// Define a macro (NAME or NAME=VALUE).
    #[arg(short = 'D', value_name = "MACRO")]
    define: Vec<String>,

    /// Undefine a macro.
    #[arg(short = 'U', value_name = "MACRO")]
    undef: Vec<String>,

    /// Print the AST as S-expressions.
    #[arg(short = 'a', long = "ast")]
    ast: bool,

    /// Print the preprocessed token stream.
    #[arg(short = 'P', long = "print-tokens")]
    print_tokens: bool,

    /// Output preprocessed source.
    #[arg(short = 'E', long = "preprocess")]
    preprocess_only: bool,

    /// Output declarations as JSON.
    #[arg(short = 'j', long = "json")]
    json: bool,

    /// Skip the preprocessing step.
    #[arg(short = 'X', long = "no-preprocess")]
    no_preprocess: bool,

    /// Write output to a file instead of stdout.
    #[arg(short = 'o', long = "out", value_name = "FILE")]
    out: Option<String>,

    /// Maximum number of errors before stopping.
    #[arg(long = "max-errors", value_name = "N", default_value_t = 20)]
    max_errors: usize,

    /// Treat warnings as errors.
    #[arg(long = "Werror")]
    werror: bool,

    /// Soft size cap for #embed (e.g. 50K, 10M, 1G).
    #[arg(long = "embed-limit", value_name = "SIZE")]
    embed_limit: Option<String>,

    /// Make the #embed size cap a hard error.
    #[arg(long = "embed-hard-limit")]
    embed_hard_limit: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("cfront: error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut sess = Session::new();
    sess.set_collect_errors(true);
    sess.set_max_errors(cli.max_errors);
    sess.set_warnings_as_errors(cli.werror);
    sess.opts.skip_preprocess = cli.no_preprocess;
    sess.opts.embed_hard_error = cli.embed_hard_limit;
    if let Some(limit) = &cli.embed_limit {
        sess.opts.embed_limit =
            parse_size(limit).with_context(|| format!("invalid --embed-limit '{}'", limit))?;
    }

    for path in &cli.include {
        sess.add_include_path(path);
    }
    for path in &cli.isystem {
        sess.add_system_include_path(path);
    }
    for def in &cli.define {
        match def.split_once('=') {
            Some((name, value)) => sess.define(name, value),
            None => sess.define(def, "1"),
        }
    }
    for name in &cli.undef {
        sess.undef(name);
    }

    // Preprocess every input first so diagnostics cover all files.
    let mut token_streams = Vec::new();
    for input in &cli.inputs {
        match sess.preprocess(input) {
            Ok(toks) => token_streams.push(toks),
            Err(err) => {
                sess.print_all_errors(&mut io::stderr())?;
                eprintln!("cfront: {}", err);
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    if sess.has_errors() || sess.warning_count() > 0 {
        sess.print_all_errors(&mut io::stderr())?;
        if sess.has_errors() {
            return Ok(ExitCode::FAILURE);
        }
    }

    let mut out = open_output(cli.out.as_deref())?;

    if cli.preprocess_only {
        for toks in &token_streams {
            output::output_preprocessed(&mut *out, toks)?;
        }
        return Ok(ExitCode::SUCCESS);
    }
    if cli.print_tokens {
        for (input, toks) in cli.inputs.iter().zip(&token_streams) {
            writeln!(out, "=== Tokens for {} ===", input)?;
            output::print_tokens(&mut *out, toks)?;
        }
        return Ok(ExitCode::SUCCESS);
    }

    let mut progs = Vec::new();
    for toks in &token_streams {
        match sess.parse(toks) {
            Ok(objs) => progs.push(objs),
            Err(err) => {
                sess.print_all_errors(&mut io::stderr())?;
                eprintln!("cfront: {}", err);
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    if sess.has_errors() {
        sess.print_all_errors(&mut io::stderr())?;
        return Ok(ExitCode::FAILURE);
    }

    let merged = match sess.link(progs) {
        Ok(merged) => merged,
        Err(err) => {
            sess.print_all_errors(&mut io::stderr())?;
            eprintln!("cfront: {}", err);
            return Ok(ExitCode::FAILURE);
        }
    };

    if cli.json {
        output::output_json(&mut *out, &sess, &merged)?;
        return Ok(ExitCode::SUCCESS);
    }
    if cli.ast {
        output::print_ast(&mut *out, &sess, &merged)?;
        return Ok(ExitCode::SUCCESS);
    }

    // Default action: report what parsed.
    let functions = merged.iter().filter(|o| o.borrow().is_function).count();
    let variables = merged.len() - functions;
    writeln!(out, "Successfully parsed {} file(s)", cli.inputs.len())?;
    writeln!(out, "  Functions: {}", functions)?;
    writeln!(out, "  Variables: {}", variables)?;
    Ok(ExitCode::SUCCESS)
}

fn open_output(path: Option<&str>) -> Result<Box<dyn Write>> {
    match path {
        None | Some("-") => Ok(Box::new(io::stdout())),
        Some(path) => {
            let file =
                File::create(path).with_context(|| format!("failed to create {}", path))?;
            Ok(Box::new(file))
        }
    }
}

/// `SIZE[K|M|G|B]` with case-insensitive suffixes, optionally ending in
/// `b` (`50K`, `50kb`, `10M`, ...).
fn parse_size(text: &str) -> Result<u64> {
    let lower = text.to_ascii_lowercase();
    let digits: String = lower.chars().take_while(|c| c.is_ascii_digit()).collect();
    let suffix = &lower[digits.len()..];
    let value: u64 = digits.parse().context("expected a number")?;
    let multiplier: u64 = match suffix {
        "" | "b" => 1,
        "k" | "kb" => 1024,
        "m" | "mb" => 1024 * 1024,
        "g" | "gb" => 1024 * 1024 * 1024,
        other => anyhow::bail!("unknown size suffix '{}'", other),
    };
    Ok(value * multiplier)
}

#[cfg(test)]
mod tests {
    use super::parse_size;

    #[test]
    fn size_suffixes() {
        assert_eq!(parse_size("100").unwrap(), 100);
        assert_eq!(parse_size("50K").unwrap(), 50 * 1024);
        assert_eq!(parse_size("50kb").unwrap(), 50 * 1024);
        assert_eq!(parse_size("10M").unwrap(), 10 * 1024 * 1024);
        assert_eq!(parse_size("1G").unwrap(), 1 << 30);
        assert_eq!(parse_size("4B").unwrap(), 4);
        assert!(parse_size("10x").is_err());
    }
}
