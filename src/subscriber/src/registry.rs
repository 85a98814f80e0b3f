use std::collections::HashMap;
use tracing::{debug, warn};
use xb_types::{ChannelId, ChannelType, ChannelUpdate, RequestId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub symbol: String,
    pub channel_type: ChannelType,
}

impl ChannelKey {
    pub fn new(symbol: &str, channel_type: ChannelType) -> ChannelKey {
        ChannelKey {
            symbol: symbol.to_string(),
            channel_type,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelEntry {
    /// Tentative until `confirmed` is set by an ack or the first update.
    pub channel_id: Option<ChannelId>,
    pub interval: Option<String>,
    pub confirmed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChannel {
    pub symbol: String,
    pub channel_type: ChannelType,
    pub interval: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub symbols: Vec<String>,
    pub channel_type: ChannelType,
}

/// Maps `(symbol, channel type)` to the channel id the server uses for it, and back.
///
/// There is at most one entry per key and one key per channel id. Entries are only
/// ever removed all at once, when the connection goes away.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    entries: HashMap<ChannelKey, ChannelEntry>,
    ids: HashMap<ChannelId, ChannelKey>,
    requests: HashMap<RequestId, PendingRequest>,
}

impl ChannelRegistry {
    pub fn register_pending(
        &mut self,
        symbol: &str,
        channel_type: ChannelType,
        tentative_id: Option<ChannelId>,
    ) -> ChannelKey {
        let key = self.key_for(symbol, channel_type);
        if let Some(previous) = self.entries.insert(key.clone(), ChannelEntry::default()) {
            if let Some(id) = previous.channel_id {
                self.unbind_id(&id, &key);
            }
        }
        if let Some(id) = tentative_id {
            self.bind(key.clone(), id, None, false);
        }
        key
    }

    pub fn track_request(
        &mut self,
        request_id: RequestId,
        symbols: &[String],
        channel_type: ChannelType,
    ) {
        self.requests.insert(
            request_id,
            PendingRequest {
                symbols: symbols.to_vec(),
                channel_type,
            },
        );
    }

    pub fn request(&self, request_id: RequestId) -> Option<&PendingRequest> {
        self.requests.get(&request_id)
    }

    pub fn remove_request(&mut self, request_id: RequestId) -> Option<PendingRequest> {
        self.requests.remove(&request_id)
    }

    /// Crosses `symbol` off a tracked request and forgets the request once none remain.
    pub fn acknowledge(&mut self, request_id: RequestId, symbol: &str) {
        let Some(request) = self.requests.get_mut(&request_id) else {
            return;
        };
        request.symbols.retain(|s| !s.eq_ignore_ascii_case(symbol));
        if request.symbols.is_empty() {
            self.requests.remove(&request_id);
        }
    }

    /// Binds the id the server reported in a subscription acknowledgment.
    pub fn confirm(&mut self, symbol: &str, channel_type: ChannelType, channel_id: ChannelId) {
        let key = self.key_for(symbol, channel_type);
        debug!(%channel_id, symbol = %key.symbol, %channel_type, "Channel confirmed");
        self.bind(key, channel_id, None, true);
    }

    /// Resolves a channel update to the subscription it belongs to.
    ///
    /// The first update seen for an id binds it; every later update with the same id
    /// resolves to the same symbol and channel type. An id that turns up with a
    /// different channel type or symbol is taken as reassigned by the server and
    /// overwrites the old binding.
    pub fn resolve_positional(&mut self, update: &ChannelUpdate) -> ResolvedChannel {
        if let Some(key) = self.ids.get(&update.channel_id) {
            if key.channel_type == update.channel_type
                && key.symbol.eq_ignore_ascii_case(&update.symbol)
            {
                let key = key.clone();
                let entry = self.entries.entry(key.clone()).or_default();
                entry.confirmed = true;
                if update.interval.is_some() {
                    entry.interval = update.interval.clone();
                }
                return ResolvedChannel {
                    symbol: key.symbol,
                    channel_type: key.channel_type,
                    interval: update.interval.clone(),
                };
            }
        }

        let key = self.key_for(&update.symbol, update.channel_type);
        self.bind(
            key.clone(),
            update.channel_id.clone(),
            update.interval.clone(),
            true,
        );
        ResolvedChannel {
            symbol: key.symbol,
            channel_type: key.channel_type,
            interval: update.interval.clone(),
        }
    }

    pub fn channel(&self, channel_id: &ChannelId) -> Option<&ChannelKey> {
        self.ids.get(channel_id)
    }

    pub fn entry(&self, symbol: &str, channel_type: ChannelType) -> Option<&ChannelEntry> {
        self.entries.get(&ChannelKey::new(symbol, channel_type))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.ids.clear();
        self.requests.clear();
    }

    // Symbols are matched case-insensitively so that the spelling used by the caller
    // survives exchanges that echo symbols in a different case.
    fn key_for(&self, symbol: &str, channel_type: ChannelType) -> ChannelKey {
        self.entries
            .keys()
            .find(|k| k.channel_type == channel_type && k.symbol.eq_ignore_ascii_case(symbol))
            .cloned()
            .unwrap_or_else(|| ChannelKey::new(symbol, channel_type))
    }

    fn bind(
        &mut self,
        key: ChannelKey,
        channel_id: ChannelId,
        interval: Option<String>,
        confirmed: bool,
    ) {
        if let Some(previous) = self.ids.insert(channel_id.clone(), key.clone()) {
            if previous != key {
                warn!(
                    %channel_id,
                    previous_symbol = %previous.symbol,
                    previous_channel = %previous.channel_type,
                    symbol = %key.symbol,
                    channel = %key.channel_type,
                    "Channel id reassigned, overwriting"
                );
                if let Some(stale) = self.entries.get_mut(&previous) {
                    if stale.channel_id.as_ref() == Some(&channel_id) {
                        *stale = ChannelEntry::default();
                    }
                }
            }
        }

        let entry = self.entries.entry(key.clone()).or_default();
        if let Some(old) = entry.channel_id.replace(channel_id.clone()) {
            if old != channel_id && self.ids.get(&old) == Some(&key) {
                self.ids.remove(&old);
            }
        }
        if interval.is_some() {
            entry.interval = interval;
        }
        entry.confirmed |= confirmed;
    }

    fn unbind_id(&mut self, channel_id: &ChannelId, key: &ChannelKey) {
        if self.ids.get(channel_id) == Some(key) {
            self.ids.remove(channel_id);
        }
    }
}
