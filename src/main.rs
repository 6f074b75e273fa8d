use tower_lsp_server::{LspService, Server};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use django_lsp::backend::Backend;

mod cli;

#[tokio::main]
async fn main() {
	let args = std::env::args().collect::<Vec<_>>();
	let args = args.iter().skip(1).map(String::as_str).collect::<Vec<_>>();
	let args = cli::parse_args(&args);

	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	let registry = tracing_subscriber::registry().with(filter);
	let layer = tracing_subscriber::fmt::layer()
		.with_writer(std::io::stderr)
		.with_ansi(false);
	match args.log_format {
		cli::LogFormat::Compact => registry.with(layer.compact()).init(),
		cli::LogFormat::Json => registry.with(layer.json()).init(),
	}

	let settings = cli::settings(&args);
	if cli::run(args).await {
		return;
	}

	let stdin = tokio::io::stdin();
	let stdout = tokio::io::stdout();
	let (service, socket) = LspService::new(move |client| Backend::with_settings(client, settings));
	Server::new(stdin, stdout, socket).serve(service).await;
}
