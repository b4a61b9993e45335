//! Echo extension.
//!
//! Listens for `message_sent` events and publishes an `echo.reply` custom
//! event with the same text. Exposes `echo` and `stats` APIs.

use tessera_extension_sdk::prelude::*;

const ECHOED_KEY: &str = "echoed";
/// Oldest host that delivers `message_sent` events with a conversation id.
const MIN_HOST: Version = Version::new(0, 3, 0);

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct EchoSettings {
    pub prefix: String,
    pub uppercase: bool,
}

impl EchoSettings {
    fn render(&self, content: &str) -> String {
        let text = format!("{}{}", self.prefix, content);
        if self.uppercase {
            text.to_uppercase()
        } else {
            text
        }
    }
}

#[derive(Default)]
pub struct EchoExtension {
    ctx: Option<Arc<ExtensionContext>>,
}

impl EchoExtension {
    pub fn new() -> Self {
        Self::default()
    }
}

fn bump(storage: &ScopedStorage) -> ExtResult<u64> {
    let count = storage.get::<u64>(ECHOED_KEY) + 1;
    storage.set(ECHOED_KEY, &count)?;
    Ok(count)
}

#[async_trait]
impl Extension for EchoExtension {
    fn id(&self) -> &str {
        "demo.echo"
    }

    fn name(&self) -> &str {
        "Echo"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "Replies to every chat message with the same text"
    }

    fn extension_type(&self) -> ExtensionType {
        ExtensionType::MessageProcessor
    }

    fn is_compatible(&self, host_version: &Version) -> bool {
        *host_version >= MIN_HOST
    }

    async fn initialize(&mut self, ctx: Arc<ExtensionContext>) -> ExtResult<()> {
        let settings: EchoSettings = ctx.config("");

        ctx.register_api("echo", |args| async move { Ok(args) })?;

        let storage = ctx.storage();
        ctx.register_api("stats", move |_| {
            let echoed = storage.get::<u64>(ECHOED_KEY);
            async move { Ok(json!({ "echoed": echoed })) }
        })?;

        let handler_ctx = ctx.clone();
        ctx.subscribe(EventKind::MessageSent, move |event| {
            let ctx = handler_ctx.clone();
            let settings = settings.clone();
            async move {
                let EventPayload::MessageSent {
                    conversation_id,
                    content,
                    ..
                } = &event.payload
                else {
                    return Ok(());
                };
                bump(&ctx.storage())?;
                ctx.emit(
                    "echo.reply",
                    json!({
                        "conversation_id": conversation_id,
                        "content": settings.render(content),
                    }),
                )
                .await?;
                Ok(())
            }
        })?;

        tracing::info!(extension_id = %ctx.extension_id(), "Echo extension initialized");
        self.ctx = Some(ctx);
        Ok(())
    }

    async fn dispose(&mut self) -> ExtResult<()> {
        self.ctx = None;
        Ok(())
    }
}

tessera_extension_sdk::declare_extension! {
    "EchoExtension" => EchoExtension::new,
}
