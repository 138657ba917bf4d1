//! threadview - live terminal view of a chat backend conversation
//!
//! Keeps one conversation's transcript in sync with the backend: REST calls
//! for history and sending, plus a push channel that streams assistant
//! output into the pending message.

mod api;
mod cli;
mod config;
mod render;
mod runtime;
mod session;
mod state_machine;
mod transcript;
mod transport;

use api::HttpApi;
use cli::Input;
use config::{ClientConfig, LogFormat};
use runtime::{ChatClient, LoggingApi, ProductionClient, ViewEvent};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use transport::WebSocketConnector;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ClientConfig::from_env()?;
    init_tracing(config.log_format);

    tracing::info!(
        api = %config.api_base_url,
        ws = %config.ws_base_url,
        "Starting threadview"
    );

    let api = LoggingApi::new(HttpApi::new(&config)?);
    let client: ProductionClient = ChatClient::spawn(api, WebSocketConnector::new(&config));
    let renderer = spawn_renderer(&client);

    let mut shell = Shell {
        client: client.clone(),
        page_size: config.page_size,
        active: None,
    };
    shell.start().await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if !shell.handle(Input::parse(&line)).await {
            break;
        }
    }

    client.shutdown().await?;
    renderer.abort();
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "threadview=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

fn spawn_renderer(client: &ProductionClient) -> tokio::task::JoinHandle<()> {
    let mut views = client.subscribe();
    let client = client.clone();
    tokio::spawn(async move {
        let mut renderer = render::Renderer::new(std::io::stdout());
        loop {
            let event = match views.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    // Redraw from a snapshot instead of the missed events
                    tracing::warn!(skipped, "Renderer fell behind, resyncing");
                    match client.snapshot().await {
                        Ok(view) => ViewEvent::Reset { view },
                        Err(_) => break,
                    }
                }
                Err(RecvError::Closed) => break,
            };
            if let Err(e) = renderer.render(&event) {
                tracing::error!(error = %e, "Failed to write output");
                break;
            }
        }
    })
}

/// Command dispatch for the interactive loop
struct Shell {
    client: ProductionClient,
    page_size: u32,
    active: Option<String>,
}

impl Shell {
    /// List conversations and open the most recent one
    async fn start(&mut self) {
        println!("{}", cli::HELP);
        match self.client.list_conversations(0, self.page_size).await {
            Ok(conversations) => {
                self.print_list(&conversations);
                if let Some(first) = conversations.first() {
                    self.open(&first.id).await;
                }
            }
            Err(e) => println!("! Failed to fetch conversations: {e}"),
        }
    }

    /// Returns false when the user asked to quit
    async fn handle(&mut self, input: Input) -> bool {
        match input {
            Input::Blank => {}
            Input::Quit => return false,
            Input::Invalid(reason) => println!("! {reason}\n{}", cli::HELP),
            Input::Threads => match self.client.list_conversations(0, self.page_size).await {
                Ok(conversations) => self.print_list(&conversations),
                Err(e) => println!("! Failed to fetch conversations: {e}"),
            },
            Input::New(title) => {
                let title = title.unwrap_or_else(|| {
                    format!("New Chat {}", chrono::Local::now().format("%H:%M:%S"))
                });
                match self.client.create_conversation(&title).await {
                    Ok(conversation) => self.open(&conversation.id).await,
                    Err(e) => println!("! Failed to create conversation: {e}"),
                }
            }
            Input::Open(id) => self.open(&id).await,
            Input::Close => {
                if self.client.activate(None).await.is_ok() {
                    self.active = None;
                }
            }
            Input::Send(content) => self.send(&content).await,
        }
        true
    }

    async fn open(&mut self, conversation_id: &str) {
        match self.client.activate(Some(conversation_id)).await {
            Ok(()) => self.active = Some(conversation_id.to_string()),
            Err(e) => println!("! {e}"),
        }
    }

    async fn send(&mut self, content: &str) {
        match &self.active {
            Some(conversation_id) => {
                if let Err(e) = self.client.send(conversation_id, content).await {
                    println!("! {e}");
                }
            }
            None => match self.client.start_conversation(content).await {
                Ok(started) => {
                    tracing::info!(
                        conv_id = %started.conversation.id,
                        messages = started.messages.len(),
                        "Started conversation"
                    );
                    self.active = Some(started.conversation.id);
                }
                Err(e) => println!("! {e}"),
            },
        }
    }

    fn print_list(&self, conversations: &[api::ConversationRecord]) {
        let mut out = std::io::stdout().lock();
        if let Err(e) = render::conversation_list(&mut out, conversations, self.active.as_deref()) {
            tracing::error!(error = %e, "Failed to write output");
        }
    }
}
