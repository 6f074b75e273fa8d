//! One-shot commands.

use std::io::stdout;
use std::path::Path;
use std::process::exit;

use anyhow::Context;
use django_lsp::config::Settings;
use django_lsp::index::{ContentHash, Index};
use django_lsp::model::UnitModels;
use django_lsp::scan::RegexScanner;
use django_lsp::{NAME, VERSION, format_loc, loc};
use globwalk::FileType;
use tracing::warn;

#[derive(Default)]
pub struct Args<'a> {
	pub globs: Vec<&'a str>,
	pub log_format: LogFormat,
	pub command: Command<'a>,
}

#[derive(Default)]
pub enum Command<'a> {
	#[default]
	Run,
	/// Index a directory and print its model graph as JSON.
	Dump { root: &'a str },
}

#[derive(Default, Clone, Copy)]
pub enum LogFormat {
	#[default]
	Compact,
	Json,
}

const HELP: &str = "\
Language server for Django models.

USAGE:
    django-lsp [OPTIONS]              Serve LSP over stdio
    django-lsp dump <ROOT> [OPTIONS]  Print the model graph under ROOT as JSON

OPTIONS:
    -h, --help              Print this message
    -v, --version           Print the version
    --models-glob <GLOBS>   Comma-separated globs selecting models units
    --log-format <FORMAT>   compact (default) or json

Logs go to stderr and honor RUST_LOG.";

pub fn parse_args<'r>(mut args: &[&'r str]) -> Args<'r> {
	let mut out = Args::default();
	loop {
		match args {
			["dump", root, rest @ ..] => {
				args = rest;
				out.command = Command::Dump { root };
			}
			["-h" | "--help", ..] => {
				eprintln!("{HELP}");
				exit(0);
			}
			["-v" | "--version", ..] => {
				eprintln!("{NAME} v{VERSION}");
				exit(0);
			}
			["--models-glob", globs, rest @ ..] => {
				args = rest;
				out.globs.extend(globs.split(','));
			}
			["--log-format", "json", rest @ ..] => {
				args = rest;
				out.log_format = LogFormat::Json;
			}
			["--log-format", "compact", rest @ ..] => {
				args = rest;
				out.log_format = LogFormat::Compact;
			}
			[] => break,
			[unknown, rest @ ..] => {
				eprintln!("Unknown flag {unknown}");
				args = rest;
			}
		}
	}
	out
}

/// Returns true if a CLI handler has been invoked.
pub async fn run(args: Args<'_>) -> bool {
	match args.command {
		Command::Run => return false,
		Command::Dump { root } => {
			_ = dump(Path::new(root), settings(&args))
				.await
				.inspect_err(|err| eprintln!("{} dump failed: {err}", loc!()));
		}
	}
	true
}

/// Settings seeded from the command line, shared by the server and `dump`.
pub fn settings(args: &Args<'_>) -> Settings {
	let mut settings = Settings::default();
	if !args.globs.is_empty() {
		settings.model_globs = args.globs.iter().map(ToString::to_string).collect();
	}
	settings
}

async fn dump(root: &Path, settings: Settings) -> anyhow::Result<()> {
	let walker = globwalk::GlobWalkerBuilder::from_patterns(root, &settings.model_globs)
		.file_type(FileType::FILE | FileType::SYMLINK)
		.follow_links(true)
		.build()
		.with_context(|| format_loc!("could not glob into {}", root.display()))?;

	let mut index = Index::new(settings);
	for entry in walker {
		let entry = match entry {
			Ok(entry) => entry,
			Err(err) => {
				warn!("skipping entry: {err}");
				continue;
			}
		};
		let path = entry.path();
		let text = tokio::fs::read_to_string(path)
			.await
			.with_context(|| format_loc!("could not read {}", path.display()))?;
		let unit = path.to_string_lossy();
		let models = UnitModels::extract(&RegexScanner, &text, &unit);
		index.commit(models, ContentHash::of(&text));
	}

	serde_json::to_writer_pretty(stdout(), index.get_all_entities())?;
	println!();
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;

	#[test]
	fn test_parse_args() {
		let args = parse_args(&["dump", "./src", "--models-glob", "**/models.py,**/schema.py", "--log-format", "json"]);
		assert!(matches!(args.command, Command::Dump { root: "./src" }));
		assert_eq!(args.globs, ["**/models.py", "**/schema.py"]);
		assert!(matches!(args.log_format, LogFormat::Json));

		let args = parse_args(&[]);
		assert!(matches!(args.command, Command::Run));
		assert!(args.globs.is_empty());
	}

	#[test]
	fn test_globs_seed_server_settings() {
		let args = parse_args(&["--models-glob", "**/schema.py"]);
		assert!(matches!(args.command, Command::Run));
		assert_eq!(settings(&args).model_globs, ["**/schema.py"]);
		assert_eq!(settings(&parse_args(&[])).model_globs, Settings::default().model_globs);
	}
}
