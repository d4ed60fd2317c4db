#![allow(unused_assignments)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use abusefilter::{
    EngineConfig, FilterError, FilterResult, FunctionRegistry, MapProvider, SyntaxChecker,
};

/// AbuseFilter rule language tool
///
/// Tokenize, parse, format, check and evaluate filter rules.
#[derive(Parser)]
#[command(name = "afl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the tokens of a rule (for debugging)
    Lex {
        /// Rule file
        file: PathBuf,
    },

    /// Print the syntax tree of a rule (for debugging)
    Parse {
        /// Rule file
        file: PathBuf,

        /// Engine configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Format rule files
    Fmt {
        /// Files to format
        files: Vec<PathBuf>,

        /// Check if files are formatted (exit 1 if not)
        #[arg(long)]
        check: bool,

        /// Write formatted output back to files
        #[arg(short, long)]
        write: bool,

        /// Engine configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Check a rule for errors and suspicious constructs
    Check {
        /// Rule file
        file: PathBuf,

        /// Comma-separated host variables (enables unknown-variable warnings)
        #[arg(long, value_delimiter = ',')]
        reserved: Vec<String>,

        /// Engine configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Evaluate a rule against a set of variables
    Eval {
        /// Rule file
        #[arg(required_unless_present = "expr", conflicts_with = "expr")]
        file: Option<PathBuf>,

        /// Rule text given inline
        #[arg(short = 'e', long = "expr")]
        expr: Option<String>,

        /// Variables as a JSON object
        #[arg(long)]
        vars: Option<PathBuf>,

        /// Condition budget (overrides the config file)
        #[arg(long)]
        max_conditions: Option<usize>,

        /// Engine configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    // Set up miette for nice error output
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .tab_width(4)
                .build(),
        )
    }))
    .ok();

    let filter = EnvFilter::try_from_env("AFL_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Lex { file } => cmd_lex(&file),
        Commands::Parse { file, config } => cmd_parse(&file, config.as_deref()),
        Commands::Fmt {
            files,
            check,
            write,
            config,
        } => cmd_fmt(&files, check, write, config.as_deref()),
        Commands::Check {
            file,
            reserved,
            config,
        } => cmd_check(&file, reserved, config.as_deref()),
        Commands::Eval {
            file,
            expr,
            vars,
            max_conditions,
            config,
            json,
        } => cmd_eval(
            file.as_deref(),
            expr,
            vars.as_deref(),
            max_conditions,
            config.as_deref(),
            json,
        ),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            let exit_code = match e.kind() {
                abusefilter::ErrorKind::Io => ExitCode::from(3),
                _ => ExitCode::from(1),
            };
            eprintln!("{:?}", miette::Report::new(e));
            exit_code
        }
    }
}

fn read_source(file: &Path) -> FilterResult<String> {
    std::fs::read_to_string(file)
        .map_err(|e| FilterError::io_error(format!("failed to read {}: {}", file.display(), e)))
}

fn load_config(path: Option<&Path>) -> FilterResult<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_file(path),
        None => Ok(EngineConfig::default()),
    }
}

fn parse_with(
    source: &str,
    registry: &FunctionRegistry,
    config: &EngineConfig,
) -> FilterResult<abusefilter::ast::Rule> {
    let tokens = abusefilter::Lexer::new(source).tokenize()?;
    abusefilter::Parser::new(tokens, source, registry)
        .with_max_depth(config.max_parse_depth)
        .parse()
}

fn checker_for<'r>(
    registry: &'r FunctionRegistry,
    config: &EngineConfig,
    extra_reserved: Vec<String>,
) -> SyntaxChecker<'r> {
    let mut checker = SyntaxChecker::new(registry);
    let reserved: Vec<String> = config
        .reserved_variables
        .iter()
        .cloned()
        .chain(extra_reserved)
        .collect();
    if !reserved.is_empty() {
        checker = checker.reserved(reserved);
    }
    for (old, new) in &config.deprecated_variables {
        checker = checker.deprecated_variable(old, new);
    }
    checker
}

fn cmd_lex(file: &Path) -> FilterResult<ExitCode> {
    let source = read_source(file)?;
    let tokens = abusefilter::Lexer::new(&source).tokenize()?;

    println!("Tokens from {}:", file.display());
    println!("{:-<60}", "");

    for token in tokens {
        println!(
            "{:>4}:{:<3}  {:20} {}",
            token.location.line,
            token.location.column,
            format!("{:?}", std::mem::discriminant(&token.kind)),
            token.kind
        );
    }

    Ok(ExitCode::SUCCESS)
}

fn cmd_parse(file: &Path, config: Option<&Path>) -> FilterResult<ExitCode> {
    let config = load_config(config)?;
    let source = read_source(file)?;
    let registry = FunctionRegistry::with_builtins();
    let rule = parse_with(&source, &registry, &config)?;

    println!("AST from {}:", file.display());
    println!("{:-<60}", "");
    println!("{:#?}", rule.body);
    println!();
    println!("Conditions: {}", rule.condition_count());

    Ok(ExitCode::SUCCESS)
}

fn cmd_fmt(
    files: &[PathBuf],
    check: bool,
    write: bool,
    config: Option<&Path>,
) -> FilterResult<ExitCode> {
    if files.is_empty() {
        eprintln!("No files given");
        return Ok(ExitCode::SUCCESS);
    }

    let config = load_config(config)?;
    let registry = FunctionRegistry::with_builtins();
    let mut any_unformatted = false;

    for file in files {
        let source = read_source(file)?;
        let formatted = abusefilter::format_rule(&parse_with(&source, &registry, &config)?);

        if check || write {
            if source == formatted {
                continue;
            }
            any_unformatted = true;

            if check {
                eprintln!("{}: not formatted", file.display());
            } else {
                std::fs::write(file, &formatted).map_err(|e| {
                    FilterError::io_error(format!("failed to write {}: {}", file.display(), e))
                })?;
                eprintln!("Formatted {}", file.display());
            }
        } else {
            print!("{}", formatted);
        }
    }

    if check && any_unformatted {
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_check(file: &Path, reserved: Vec<String>, config: Option<&Path>) -> FilterResult<ExitCode> {
    let config = load_config(config)?;
    let source = read_source(file)?;
    let registry = FunctionRegistry::with_builtins();

    let rule = parse_with(&source, &registry, &config)?;
    let warnings = checker_for(&registry, &config, reserved).check(&rule)?;

    for warning in &warnings {
        eprintln!("{}", warning);
    }
    println!(
        "{}: ok ({} warning{}, {} conditions)",
        file.display(),
        warnings.len(),
        if warnings.len() == 1 { "" } else { "s" },
        rule.condition_count()
    );
    Ok(ExitCode::SUCCESS)
}

fn cmd_eval(
    file: Option<&Path>,
    expr: Option<String>,
    vars: Option<&Path>,
    max_conditions: Option<usize>,
    config: Option<&Path>,
    json: bool,
) -> FilterResult<ExitCode> {
    let mut config = load_config(config)?;
    if let Some(max) = max_conditions {
        config.limits.max_conditions = max;
    }

    let source = match (expr, file) {
        (Some(expr), _) => expr,
        (None, Some(file)) => read_source(file)?,
        (None, None) => return Err(FilterError::io_error("no rule given")),
    };

    let provider = match vars {
        Some(path) => MapProvider::from_json_str(&read_source(path)?)?,
        None => MapProvider::new(),
    };

    let registry = FunctionRegistry::with_builtins();
    let rule = parse_with(&source, &registry, &config)?;
    let evaluation =
        abusefilter::Evaluator::new(&registry).evaluate(&rule, &provider, &config.limits)?;

    for warning in &evaluation.warnings {
        eprintln!("{}", warning);
    }

    if json {
        let report = serde_json::json!({
            "matched": evaluation.matched(),
            "value": evaluation.value.to_serde_json(),
            "conditions": evaluation.conditions,
            "warnings": evaluation
                .warnings
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>(),
        });
        println!("{}", report);
    } else {
        println!("{}", evaluation.value.repr());
        println!(
            "matched: {} ({} conditions)",
            evaluation.matched(),
            evaluation.conditions
        );
    }

    Ok(ExitCode::SUCCESS)
}
