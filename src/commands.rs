//! Named experiment commands.
//!
//! The scenario runner invokes commands by name with textual arguments. Each
//! handler parses its own arguments before touching the [DhtModule].

use std::collections::BTreeMap;

use futures::future::LocalBoxFuture;
use tracing::debug;

use crate::{module::DhtModule, overlay::Overlay, Error, Result};

/// Handler of one named command.
pub type Handler<O> =
    for<'a> fn(&'a DhtModule<O>, &'a [String]) -> LocalBoxFuture<'a, Result<()>>;

/// Registry of the commands a scenario may use.
pub struct Commands<O> {
    handlers: BTreeMap<&'static str, Handler<O>>,
}

impl<O: Overlay + 'static> Default for Commands<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: Overlay + 'static> Commands<O> {
    /// Registry of the DHT experiment commands.
    pub fn new() -> Self {
        let mut commands = Self {
            handlers: BTreeMap::new(),
        };

        commands.register("introduce_peers_dht", introduce_peers_dht::<O>);
        commands.register("store", store::<O>);
        commands.register("find", find::<O>);
        commands.register("do_dht_announce", do_dht_announce::<O>);

        commands
    }

    /// Add or replace the handler of `name`.
    pub fn register(&mut self, name: &'static str, handler: Handler<O>) {
        self.handlers.insert(name, handler);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }

    /// Run the command `name` against `module`.
    pub async fn dispatch(&self, module: &DhtModule<O>, name: &str, args: &[String]) -> Result<()> {
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| Error::UnknownCommand(name.to_string()))?;

        debug!(command = name, ?args, "Dispatching command");

        handler(module, args).await
    }
}

fn expect_args<'a, const N: usize>(command: &'static str, args: &'a [String]) -> Result<&'a [String; N]> {
    args.try_into().map_err(|_| Error::InvalidArguments {
        command,
        reason: format!("expected {N} argument(s), got {}", args.len()),
    })
}

fn introduce_peers_dht<'a, O: Overlay + 'static>(
    module: &'a DhtModule<O>,
    args: &'a [String],
) -> LocalBoxFuture<'a, Result<()>> {
    Box::pin(async move {
        expect_args::<0>("introduce_peers_dht", args)?;
        module.introduce_peers_dht()?;
        Ok(())
    })
}

fn store<'a, O: Overlay + 'static>(
    module: &'a DhtModule<O>,
    args: &'a [String],
) -> LocalBoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let [key, value] = expect_args::<2>("store", args)?;
        module.store(key, value).await?;
        Ok(())
    })
}

fn find<'a, O: Overlay + 'static>(
    module: &'a DhtModule<O>,
    args: &'a [String],
) -> LocalBoxFuture<'a, Result<()>> {
    Box::pin(async move {
        let [key] = expect_args::<1>("find", args)?;
        module.find(key).await?;
        Ok(())
    })
}

fn do_dht_announce<'a, O: Overlay + 'static>(
    module: &'a DhtModule<O>,
    args: &'a [String],
) -> LocalBoxFuture<'a, Result<()>> {
    Box::pin(async move {
        expect_args::<0>("do_dht_announce", args)?;
        module.do_dht_announce().await?;
        Ok(())
    })
}
