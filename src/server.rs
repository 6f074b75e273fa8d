use std::path::PathBuf;
use std::sync::atomic::Ordering::Relaxed;

use tower_lsp_server::jsonrpc::Result;
use tower_lsp_server::lsp_types::notification::{DidChangeConfiguration, DidChangeWatchedFiles, Notification};
use tower_lsp_server::lsp_types::*;
use tower_lsp_server::{LanguageServer, UriExt};
use tracing::{debug, error, info, instrument, warn};

use crate::backend::{Backend, CONFIG_SECTION};

impl LanguageServer for Backend {
	#[instrument(skip_all, ret)]
	async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
		for folder in params.workspace_folders.iter().flatten() {
			match folder.uri.to_file_path() {
				Some(path) => _ = self.workspaces.insert(path.into_owned()),
				None => warn!("not a file path: {}", folder.uri.as_str()),
			}
		}
		if let Some(config) = params.initialization_options.and_then(Backend::config_from_value) {
			self.on_change_config(config).await;
		}

		if let Some(WorkspaceClientCapabilities {
			did_change_configuration:
				Some(DynamicRegistrationClientCapabilities {
					dynamic_registration: Some(true),
				}),
			..
		}) = params.capabilities.workspace.as_ref()
		{
			self.capabilities.can_notify_changed_config.store(true, Relaxed);
		}
		if let Some(WorkspaceClientCapabilities {
			did_change_watched_files:
				Some(DidChangeWatchedFilesClientCapabilities {
					dynamic_registration: Some(true),
					..
				}),
			..
		}) = params.capabilities.workspace.as_ref()
		{
			self.capabilities.can_notify_changed_watched_files.store(true, Relaxed);
		}

		Ok(InitializeResult {
			server_info: Some(ServerInfo {
				name: crate::NAME.to_string(),
				version: Some(crate::VERSION.to_string()),
			}),
			capabilities: ServerCapabilities {
				definition_provider: Some(OneOf::Left(true)),
				hover_provider: Some(HoverProviderCapability::Simple(true)),
				text_document_sync: Some(TextDocumentSyncCapability::Options(TextDocumentSyncOptions {
					change: Some(TextDocumentSyncKind::FULL),
					save: Some(TextDocumentSyncSaveOptions::SaveOptions(SaveOptions {
						include_text: Some(true),
					})),
					open_close: Some(true),
					..Default::default()
				})),
				completion_provider: Some(CompletionOptions {
					resolve_provider: None,
					trigger_characters: Some(['.', '(', ',', ' ', '_', '\'', '"'].iter().map(char::to_string).collect()),
					all_commit_characters: None,
					completion_item: None,
					work_done_progress_options: Default::default(),
				}),
				workspace: Some(WorkspaceServerCapabilities {
					workspace_folders: Some(WorkspaceFoldersServerCapabilities {
						supported: Some(true),
						change_notifications: Some(OneOf::Left(true)),
					}),
					file_operations: None,
				}),
				..ServerCapabilities::default()
			},
		})
	}
	#[instrument(skip_all)]
	async fn shutdown(&self) -> Result<()> {
		Ok(())
	}
	#[instrument(skip_all)]
	async fn initialized(&self, _: InitializedParams) {
		let mut registrations = vec![];
		if self.capabilities.can_notify_changed_config.load(Relaxed) {
			registrations.push(Registration {
				id: "django-lsp/did-change-config".to_string(),
				method: DidChangeConfiguration::METHOD.to_string(),
				register_options: None,
			});
		}
		if self.capabilities.can_notify_changed_watched_files.load(Relaxed) {
			let globs = self.index.read().await.settings().model_globs.clone();
			let options = DidChangeWatchedFilesRegistrationOptions {
				watchers: globs
					.into_iter()
					.map(|glob| FileSystemWatcher {
						glob_pattern: GlobPattern::String(glob),
						kind: Some(WatchKind::Create | WatchKind::Change | WatchKind::Delete),
					})
					.collect(),
			};
			match serde_json::to_value(options) {
				Ok(register_options) => registrations.push(Registration {
					id: "django-lsp/did-change-watched-files".to_string(),
					method: DidChangeWatchedFiles::METHOD.to_string(),
					register_options: Some(register_options),
				}),
				Err(err) => error!("could not serialize watchers: {err}"),
			}
		}
		if !registrations.is_empty() {
			_ = self.client.register_capability(registrations).await;
		}

		let roots = self.workspaces.iter().map(|root| root.key().clone()).collect::<Vec<PathBuf>>();
		info!(workspaces = ?roots);
		for root in roots {
			match self.index_root(&root).await {
				Ok(Some(stats)) => self.report(&root, &stats),
				Ok(None) => {}
				Err(err) => error!("could not index root {}:\n{err}", root.display()),
			}
		}
	}
	#[instrument(skip_all, fields(uri = params.text_document.uri.path().as_str()))]
	async fn did_open(&self, params: DidOpenTextDocumentParams) {
		let language_id = params.text_document.language_id.as_str();
		let split_uri = params.text_document.uri.path().as_str().rsplit_once('.');
		if !matches!((language_id, split_uri), ("python", _) | (_, Some((_, "py")))) {
			debug!("not a python document: language_id={language_id} split_uri={split_uri:?}");
			return;
		}
		_ = self
			.on_change(&params.text_document.uri, params.text_document.text)
			.await
			.inspect_err(|err| warn!("{err}"));
	}
	#[instrument(skip_all)]
	async fn did_change(&self, mut params: DidChangeTextDocumentParams) {
		// Full sync: the last event carries the whole document.
		let Some(change) = params.content_changes.pop() else {
			return;
		};
		_ = self
			.on_change(&params.text_document.uri, change.text)
			.await
			.inspect_err(|err| warn!("{err}"));
	}
	#[instrument(skip_all)]
	async fn did_save(&self, params: DidSaveTextDocumentParams) {
		let Some(text) = params.text else {
			return;
		};
		_ = self
			.on_change(&params.text_document.uri, text)
			.await
			.inspect_err(|err| warn!("{err}"));
	}
	#[instrument(skip(self))]
	async fn did_close(&self, params: DidCloseTextDocumentParams) {
		// The unit stays in the graph; only the buffer goes away.
		self.document_map.remove(params.text_document.uri.path().as_str());
	}
	#[instrument(skip_all)]
	async fn completion(&self, params: CompletionParams) -> Result<Option<CompletionResponse>> {
		let uri = &params.text_document_position.text_document.uri;
		debug!("(completion) {}", uri.path().as_str());
		match self.completions(params).await {
			Ok(ret) => Ok(ret),
			Err(err) => {
				error!("error during completion:\n{err}");
				Ok(None)
			}
		}
	}
	#[instrument(skip_all)]
	async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
		match Backend::hover(self, params).await {
			Ok(ret) => Ok(ret),
			Err(err) => {
				error!("{err}");
				Ok(None)
			}
		}
	}
	#[instrument(skip_all)]
	async fn goto_definition(&self, params: GotoDefinitionParams) -> Result<Option<GotoDefinitionResponse>> {
		let location = self
			.jump_def(params)
			.await
			.map_err(|err| error!("Error retrieving definition:\n{err}"))
			.ok()
			.flatten();
		Ok(location.map(GotoDefinitionResponse::Scalar))
	}
	#[instrument(skip_all)]
	async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
		if params.settings.get(CONFIG_SECTION).is_some() {
			if let Some(config) = Backend::config_from_value(params.settings) {
				self.on_change_config(config).await;
			}
			return;
		}
		// Pull-style clients send an empty payload and expect us to ask.
		let items = vec![ConfigurationItem {
			scope_uri: None,
			section: Some(CONFIG_SECTION.to_string()),
		}];
		let configs = self.client.configuration(items).await.unwrap_or_default();
		for config in configs {
			if let Some(config) = Backend::config_from_value(config) {
				self.on_change_config(config).await;
			}
		}
	}
	#[instrument(skip_all)]
	async fn did_change_workspace_folders(&self, params: DidChangeWorkspaceFoldersParams) {
		for removed in params.event.removed {
			let Some(path) = removed.uri.to_file_path() else {
				error!("not a file path: {}", removed.uri.as_str());
				continue;
			};
			self.remove_root(&path).await;
		}
		for added in params.event.added {
			let Some(path) = added.uri.to_file_path() else {
				error!("not a file path: {}", added.uri.as_str());
				continue;
			};
			self.workspaces.insert(path.to_path_buf());
			match self.index_root(&path).await {
				Ok(Some(stats)) => self.report(&path, &stats),
				Ok(None) => {}
				Err(err) => warn!("failed to add root {}:\n{err}", path.display()),
			}
		}
	}
	#[instrument(skip_all)]
	async fn did_change_watched_files(&self, params: DidChangeWatchedFilesParams) {
		for FileEvent { uri, typ } in params.changes {
			if typ == FileChangeType::DELETED {
				info!("unit deleted: {}", uri.path().as_str());
				self.on_delete(&uri).await;
				continue;
			}
			// Open buffers are kept current by the document events.
			if self.document_map.contains_key(uri.path().as_str()) {
				continue;
			}
			let Some(path) = uri.to_file_path() else {
				continue;
			};
			match tokio::fs::read_to_string(&path).await {
				Ok(text) => self.analyze(&path, &text).await,
				Err(err) => warn!("could not read {}: {err}", path.display()),
			}
		}
	}
}
