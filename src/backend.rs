//! This module contains all leaf methods for [Backend] that are not suitable
//! for inclusion in [server](crate::server).

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use anyhow::Context;
use dashmap::{DashMap, DashSet};
use globwalk::FileType;
use ropey::Rope;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tower_lsp_server::lsp_types::*;
use tower_lsp_server::{Client, UriExt};
use tracing::{debug, info, instrument, warn};

use crate::completions::{Candidate, CandidateKind, Insertion};
use crate::config::{Config, Settings};
use crate::index::{ContentHash, Index};
use crate::model::{Location as UnitLocation, UnitModels};
use crate::scan::RegexScanner;
use crate::utils::{ByteOffset, offset_to_position, position_to_offset};
use crate::{errloc, format_loc, ok, some};

#[cfg(test)]
mod tests;

/// The section clients put this server's settings under.
pub const CONFIG_SECTION: &str = "django-lsp";

pub struct Backend {
	pub client: Client,
	pub document_map: DashMap<String, Document>,
	pub index: RwLock<Index>,
	pub roots: DashSet<PathBuf>,
	pub workspaces: DashSet<PathBuf>,
	pub capabilities: Capabilities,
}

#[derive(Debug, Default)]
pub struct Capabilities {
	pub can_notify_changed_config: AtomicBool,
	pub can_notify_changed_watched_files: AtomicBool,
}

pub struct Document {
	pub rope: Rope,
}

/// Statistics for one indexed root.
#[derive(Debug, Default)]
pub struct IndexStats {
	pub units: usize,
	pub entities: usize,
	pub elapsed: std::time::Duration,
}

impl Backend {
	pub fn new(client: Client) -> Self {
		Self::with_settings(client, Settings::default())
	}

	/// Starts from `settings` instead of the defaults; client configuration still merges on top.
	pub fn with_settings(client: Client, settings: Settings) -> Self {
		Self {
			client,
			document_map: DashMap::new(),
			index: RwLock::new(Index::new(settings)),
			roots: DashSet::new(),
			workspaces: DashSet::new(),
			capabilities: Capabilities::default(),
		}
	}

	/// Whether `path` is a unit the model graph should hold.
	pub fn is_models_unit(path: &Path) -> bool {
		if path.extension().and_then(|ext| ext.to_str()) != Some("py") {
			return false;
		}
		path.file_name().is_some_and(|name| name == "models.py")
			|| path
				.parent()
				.and_then(Path::file_name)
				.is_some_and(|parent| parent == "models")
	}

	/// Applies client settings on top of the current ones.
	pub async fn on_change_config(&self, config: Config) {
		let mut index = self.index.write().await;
		let mut settings = index.settings().clone();
		settings.merge(&config);
		debug!(?settings, "settings updated");
		index.configure(settings);
	}

	pub fn config_from_value(value: Value) -> Option<Config> {
		let value = match value {
			Value::Object(mut map) if map.contains_key(CONFIG_SECTION) => map.remove(CONFIG_SECTION)?,
			value => value,
		};
		serde_json::from_value(value)
			.inspect_err(|err| warn!("invalid configuration: {err}"))
			.ok()
	}

	/// Re-analyzes a models unit. Extraction runs before the write lock is taken.
	#[instrument(skip_all, fields(path = %path.display()))]
	pub async fn analyze(&self, path: &Path, text: &str) {
		if !Self::is_models_unit(path) {
			return;
		}
		let unit = path.to_string_lossy();
		let hash = ContentHash::of(text);
		if self.index.read().await.is_fresh(&unit, &hash) {
			return;
		}
		let models = UnitModels::extract(&RegexScanner, text, &unit);
		let orphaned = self.index.write().await.commit(models, hash);
		self.restore(orphaned).await;
	}

	/// Analyzes again the units whose entities lost to a unit that has since gone away.
	async fn restore(&self, mut pending: Vec<String>) {
		let mut seen = std::collections::HashSet::new();
		while let Some(unit) = pending.pop() {
			if !seen.insert(unit.clone()) {
				continue;
			}
			let path = PathBuf::from(&unit);
			let open = Uri::from_file_path(&path).and_then(|uri| {
				self.document_map
					.get(uri.path().as_str())
					.map(|document| document.rope.to_string())
			});
			let text = match open {
				Some(text) => text,
				None => match tokio::fs::read_to_string(&path).await {
					Ok(text) => text,
					Err(err) => {
						debug!("could not restore {unit}: {err}");
						continue;
					}
				},
			};
			info!(%unit, "restoring displaced unit");
			let models = UnitModels::extract(&RegexScanner, &text, &unit);
			let orphaned = self.index.write().await.commit(models, ContentHash::of(&text));
			pending.extend(orphaned);
		}
	}

	pub async fn on_change(&self, uri: &Uri, text: String) -> anyhow::Result<()> {
		let path = ok!(uri.to_file_path(), "not a file path: {}", uri.as_str());
		let rope = Rope::from_str(&text);
		self.document_map
			.insert(uri.path().as_str().to_string(), Document { rope });
		self.analyze(&path, &text).await;
		Ok(())
	}

	/// Forgets a workspace folder and every unit found under it.
	pub async fn remove_root(&self, root: &Path) {
		self.workspaces.remove(root);
		self.roots.remove(root);
		let mut index = self.index.write().await;
		let units = index
			.get_all_entities()
			.values()
			.filter(|entity| Path::new(&entity.source_unit).starts_with(root))
			.map(|entity| entity.source_unit.clone())
			.collect::<std::collections::BTreeSet<_>>();
		let mut orphaned = vec![];
		for unit in units {
			orphaned.extend(index.remove_unit(&unit));
		}
		drop(index);
		orphaned.retain(|unit| !Path::new(unit).starts_with(root));
		self.restore(orphaned).await;
	}

	pub async fn on_delete(&self, uri: &Uri) {
		let Some(path) = uri.to_file_path() else {
			return;
		};
		if Self::is_models_unit(&path) {
			let orphaned = self.index.write().await.remove_unit(&path.to_string_lossy());
			self.restore(orphaned).await;
		}
	}

	/// Extracts every models unit under `root` concurrently, then commits them one by one.
	#[instrument(skip(self))]
	pub async fn index_root(&self, root: &Path) -> anyhow::Result<Option<IndexStats>> {
		if !self.roots.insert(root.to_path_buf()) {
			return Ok(None);
		}
		let start = std::time::Instant::now();
		let globs = self.index.read().await.settings().model_globs.clone();
		let walker = globwalk::GlobWalkerBuilder::from_patterns(root, &globs)
			.file_type(FileType::FILE | FileType::SYMLINK)
			.follow_links(true)
			.build()
			.with_context(|| format_loc!("could not glob into {}", root.display()))?;

		let mut tasks = JoinSet::new();
		for entry in walker {
			let entry = match entry {
				Ok(entry) => entry,
				Err(err) => {
					debug!("skipping entry: {err}");
					continue;
				}
			};
			let path = entry.path().to_path_buf();
			tasks.spawn(async move {
				let text = tokio::fs::read_to_string(&path)
					.await
					.with_context(|| format_loc!("could not read {}", path.display()))?;
				let unit = path.to_string_lossy().to_string();
				let hash = ContentHash::of(&text);
				anyhow::Ok((UnitModels::extract(&RegexScanner, &text, &unit), hash))
			});
		}

		let mut stats = IndexStats::default();
		while let Some(result) = tasks.join_next().await {
			let (models, hash) = match result.map_err(|err| errloc!("task failed: {}", err)) {
				Ok(Ok(ok)) => ok,
				Ok(Err(err)) | Err(err) => {
					warn!("{err}");
					continue;
				}
			};
			stats.units += 1;
			stats.entities += models.entities.len();
			let orphaned = self.index.write().await.commit(models, hash);
			self.restore(orphaned).await;
		}
		stats.elapsed = start.elapsed();
		Ok(Some(stats))
	}

	/// The text an analysis needs: the cursor line and the configured look-back before it.
	fn preceding_text(rope: &Rope, offset: ByteOffset, look_back: usize) -> Option<String> {
		let line = rope.try_byte_to_line(offset.0).ok()?;
		let first = rope.try_line_to_byte(line.saturating_sub(look_back)).ok()?;
		Some(rope.get_byte_slice(first..offset.0)?.to_string())
	}

	pub async fn completions(&self, params: CompletionParams) -> anyhow::Result<Option<CompletionResponse>> {
		let uri = &params.text_document_position.text_document.uri;
		let path = ok!(uri.to_file_path(), "not a file path: {}", uri.as_str());
		let rope = {
			let document = some!(self.document_map.get(uri.path().as_str()));
			document.rope.clone()
		};
		let position = params.text_document_position.position;
		let offset = ok!(position_to_offset(position, &rope), "position out of bounds");

		let index = self.index.read().await;
		let limit = index.settings().completions_limit;
		let preceding = some!(Self::preceding_text(&rope, offset, index.settings().look_back));
		let candidates = index.resolve_completions(&preceding, &path.to_string_lossy());
		drop(index);

		let prefix_len = preceding
			.chars()
			.rev()
			.take_while(|ch| ch.is_alphanumeric() || *ch == '_')
			.map(char::len_utf16)
			.sum::<usize>();
		let start = Position::new(
			position.line,
			position.character.saturating_sub(prefix_len as u32),
		);
		let range = Range::new(start, position);
		let is_incomplete = candidates.len() >= limit;
		Ok(Some(CompletionResponse::List(CompletionList {
			is_incomplete,
			items: candidates.into_iter().map(|candidate| completion_item(candidate, range)).collect(),
		})))
	}

	/// The identifier under `position` and the text before it.
	fn word_at(rope: &Rope, position: Position, look_back: usize) -> Option<(String, String, Range)> {
		let offset = position_to_offset(position, rope)?;
		let line = rope.try_byte_to_line(offset.0).ok()?;
		let line_start = rope.try_line_to_byte(line).ok()?;
		let text = rope.line(line).to_string();
		let cursor = offset.0 - line_start;
		let is_ident = |ch: char| ch.is_alphanumeric() || ch == '_';
		let start = text[..cursor].trim_end_matches(is_ident).len();
		let tail = &text[cursor..];
		let end = cursor + tail.len() - tail.trim_start_matches(is_ident).len();
		if start == end {
			return None;
		}
		let word = text[start..end].to_string();
		let preceding = Self::preceding_text(rope, ByteOffset(line_start + start), look_back)?;
		let range = Range::new(
			offset_to_position(ByteOffset(line_start + start), rope)?,
			offset_to_position(ByteOffset(line_start + end), rope)?,
		);
		Some((word, preceding, range))
	}

	pub async fn hover(&self, params: HoverParams) -> anyhow::Result<Option<Hover>> {
		let uri = &params.text_document_position_params.text_document.uri;
		let path = ok!(uri.to_file_path(), "not a file path: {}", uri.as_str());
		let rope = some!(self.document_map.get(uri.path().as_str())).rope.clone();
		let index = self.index.read().await;
		let position = params.text_document_position_params.position;
		let (word, preceding, range) = some!(Self::word_at(&rope, position, index.settings().look_back));
		let value = some!(index.describe(&preceding, &word, &path.to_string_lossy()));
		Ok(Some(Hover {
			contents: HoverContents::Markup(MarkupContent {
				kind: MarkupKind::Markdown,
				value,
			}),
			range: Some(range),
		}))
	}

	pub async fn jump_def(&self, params: GotoDefinitionParams) -> anyhow::Result<Option<Location>> {
		let uri = &params.text_document_position_params.text_document.uri;
		let path = ok!(uri.to_file_path(), "not a file path: {}", uri.as_str());
		let rope = some!(self.document_map.get(uri.path().as_str())).rope.clone();
		let index = self.index.read().await;
		let position = params.text_document_position_params.position;
		let (word, preceding, _) = some!(Self::word_at(&rope, position, index.settings().look_back));
		let location = some!(index.locate(&preceding, &word, &path.to_string_lossy()));
		Ok(Some(to_lsp_location(&location)?))
	}

	/// Logs a one-line summary per indexed root.
	pub fn report(&self, root: &Path, stats: &IndexStats) {
		info!(
			target: "initialized",
			"{} | {} units | {} models | {:.2}s",
			root.display(),
			stats.units,
			stats.entities,
			stats.elapsed.as_secs_f64()
		);
	}
}

fn to_lsp_location(location: &UnitLocation) -> anyhow::Result<Location> {
	let uri = ok!(Uri::from_file_path(&location.unit), "invalid unit path: {}", location.unit);
	let start = Position::new(location.line, 0);
	Ok(Location {
		uri,
		range: Range::new(start, start),
	})
}

/// Translates a [Candidate] into the editor's vocabulary, snippets included.
pub fn completion_item(candidate: Candidate, range: Range) -> CompletionItem {
	let kind = match candidate.kind {
		CandidateKind::Field => CompletionItemKind::FIELD,
		CandidateKind::Lookup => CompletionItemKind::OPERATOR,
		CandidateKind::Method | CandidateKind::QuerySetOp => CompletionItemKind::METHOD,
		CandidateKind::Property => CompletionItemKind::PROPERTY,
		CandidateKind::Entity => CompletionItemKind::CLASS,
		CandidateKind::FieldType => CompletionItemKind::CONSTRUCTOR,
	};
	let name = &candidate.name;
	let (snippet, command) = match candidate.insertion {
		Insertion::Bare => (None, None),
		Insertion::Keyword => (Some(format!("{name}=$0")), None),
		Insertion::Call { args: true } => (Some(format!("{name}($0)")), None),
		Insertion::Call { args: false } => (Some(format!("{name}()")), None),
		Insertion::QuotedCall => (Some(format!("{name}('$0')")), None),
		Insertion::Traverse => (
			Some(format!("{name}$0")),
			Some(Command {
				title: "Suggest".to_string(),
				command: "editor.action.triggerSuggest".to_string(),
				arguments: None,
			}),
		),
	};
	let new_text = snippet.clone().unwrap_or_else(|| candidate.name.clone());
	CompletionItem {
		text_edit: Some(CompletionTextEdit::Edit(TextEdit { range, new_text })),
		insert_text_format: snippet.map(|_| InsertTextFormat::SNIPPET),
		label: candidate.name,
		kind: Some(kind),
		detail: Some(candidate.detail),
		documentation: candidate.documentation.map(|value| {
			Documentation::MarkupContent(MarkupContent {
				kind: MarkupKind::Markdown,
				value,
			})
		}),
		command,
		..Default::default()
	}
}
