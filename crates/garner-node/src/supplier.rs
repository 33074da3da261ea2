//! The supplier role: serving storage to customers.
//!
//! A supplier grants `service_supplier` to customers, then answers their
//! `Data` / `Retrieve` / `ListFiles` / `DeleteFile` / `DeleteBackup`
//! packets against a per-customer directory on disk. Segment files are
//! named by their segment ID with `/` folded to `#`, so a directory
//! listing converts straight back into the wire grammar. The customer's
//! encrypted catalog index replica is held next to the segments.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use garner_crypto::ed25519::SigningKey;
use garner_packet::service::{
    from_payload, to_payload, FilesListing, ServiceAck, ServiceRequest, SERVICE_SUPPLIER,
};
use garner_packet::{Command, Packet, SignedPacket};
use garner_session::gateway::Gateway;
use garner_session::{HandlerResult, PacketContext};
use garner_types::{IdUrl, SegmentId};
use tracing::{debug, info, warn};

/// Packet-ID prefix of catalog index replica traffic.
const INDEX_PREFIX: &str = "index";

/// One node's supplier service.
pub struct SupplierService {
    me: IdUrl,
    signer: SigningKey,
    gateway: Arc<Gateway>,
    root: PathBuf,
    donated_bytes: u64,
    grants: Mutex<HashMap<IdUrl, u64>>,
}

impl SupplierService {
    /// Create a supplier service storing under `root`.
    pub fn new(
        me: IdUrl,
        signer: SigningKey,
        gateway: Arc<Gateway>,
        root: PathBuf,
        donated_bytes: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            me,
            signer,
            gateway,
            root,
            donated_bytes,
            grants: Mutex::new(HashMap::new()),
        })
    }

    /// Register the service on the gateway's inbox chain.
    pub fn install(self: &Arc<Self>) {
        let service = self.clone();
        self.gateway
            .add_handler("supplier-storage", move |packet, ctx| {
                service.handle_packet(packet, ctx)
            });
    }

    /// Bytes currently granted across all customers.
    pub fn granted_bytes(&self) -> u64 {
        self.lock_grants().values().sum()
    }

    /// Whether a customer holds a storage grant.
    pub fn has_grant(&self, customer: &IdUrl) -> bool {
        self.lock_grants().contains_key(customer)
    }

    /// Inbox entry point.
    pub fn handle_packet(&self, packet: &SignedPacket, ctx: &PacketContext) -> HandlerResult {
        let inner = packet.packet();
        match inner.command {
            Command::RequestService => self.on_request_service(inner, ctx),
            Command::CancelService => self.on_cancel_service(inner, ctx),
            Command::Data => self.on_data(inner, ctx),
            Command::Retrieve => self.on_retrieve(inner, ctx),
            Command::ListFiles => self.on_list_files(inner, ctx),
            Command::DeleteFile => self.on_delete_file(inner, ctx),
            Command::DeleteBackup => self.on_delete_backup(inner, ctx),
            _ => HandlerResult::NotHandled,
        }
    }

    fn on_request_service(&self, inner: &Packet, ctx: &PacketContext) -> HandlerResult {
        let Ok(request) = from_payload::<ServiceRequest>(&inner.payload) else {
            return HandlerResult::NotHandled;
        };
        if request.service != SERVICE_SUPPLIER {
            return HandlerResult::NotHandled;
        }
        let Ok(params) = request.supplier_params() else {
            self.answer(inner, ctx, &ServiceAck::rejected("bad parameters"));
            return HandlerResult::Consumed;
        };

        let mut grants = self.lock_grants();
        let already = grants.get(&inner.creator_id).copied();
        let others: u64 = grants
            .iter()
            .filter(|(customer, _)| **customer != inner.creator_id)
            .map(|(_, bytes)| *bytes)
            .sum();
        if others + params.needed_bytes > self.donated_bytes {
            drop(grants);
            debug!(customer = %inner.creator_id, "storage grant rejected: donation exhausted");
            self.answer(inner, ctx, &ServiceAck::rejected("donation exhausted"));
            return HandlerResult::Consumed;
        }
        grants.insert(inner.creator_id.clone(), params.needed_bytes);
        drop(grants);

        info!(
            customer = %inner.creator_id,
            needed = params.needed_bytes,
            refreshed = already.is_some(),
            "storage granted"
        );
        self.answer(inner, ctx, &ServiceAck::accepted());
        HandlerResult::Consumed
    }

    fn on_cancel_service(&self, inner: &Packet, ctx: &PacketContext) -> HandlerResult {
        if self.lock_grants().remove(&inner.creator_id).is_none() {
            return HandlerResult::NotHandled;
        }
        info!(customer = %inner.creator_id, "storage grant cancelled");
        self.answer(inner, ctx, &ServiceAck::accepted());
        HandlerResult::Consumed
    }

    fn on_data(&self, inner: &Packet, ctx: &PacketContext) -> HandlerResult {
        if !self.lock_grants().contains_key(&inner.owner_id) {
            return HandlerResult::NotHandled;
        }

        if let Some(revision) = parse_index_id(&inner.packet_id) {
            return match self.store_index(&inner.owner_id, revision, &inner.payload) {
                Ok(()) => {
                    self.answer(inner, ctx, &ServiceAck::accepted());
                    HandlerResult::Consumed
                }
                Err(reason) => self.fail(inner, ctx, &reason),
            };
        }

        let Ok(segment) = SegmentId::parse(&inner.packet_id) else {
            return self.fail(inner, ctx, "bad segment id");
        };

        let dir = self.customer_dir(&segment);
        let used = dir_size(&dir);
        let quota = self
            .lock_grants()
            .get(&inner.owner_id)
            .copied()
            .unwrap_or(0);
        if used + inner.payload.len() as u64 > quota {
            warn!(customer = %inner.owner_id, used, "segment rejected: quota");
            return self.fail(inner, ctx, "quota exceeded");
        }

        if let Err(err) = write_file(&dir.join(encode_name(&segment.to_string())), &inner.payload)
        {
            return self.fail(inner, ctx, &err);
        }
        debug!(segment = %segment, bytes = inner.payload.len(), "segment stored");
        self.answer(inner, ctx, &ServiceAck::accepted());
        HandlerResult::Consumed
    }

    fn on_retrieve(&self, inner: &Packet, ctx: &PacketContext) -> HandlerResult {
        if parse_index_id(&inner.packet_id).is_some() || inner.packet_id == INDEX_PREFIX {
            let dir = self.customer_dir_for(&inner.owner_id);
            return match std::fs::read(dir.join(INDEX_PREFIX)) {
                Ok(bytes) => {
                    self.respond_data(inner, ctx, bytes);
                    HandlerResult::Consumed
                }
                Err(_) => self.fail(inner, ctx, "no index replica"),
            };
        }

        let Ok(segment) = SegmentId::parse(&inner.packet_id) else {
            return self.fail(inner, ctx, "bad segment id");
        };
        let path = self
            .customer_dir(&segment)
            .join(encode_name(&segment.to_string()));
        match std::fs::read(&path) {
            Ok(bytes) => {
                debug!(segment = %segment, bytes = bytes.len(), "segment served");
                self.respond_data(inner, ctx, bytes);
                HandlerResult::Consumed
            }
            Err(_) => self.fail(inner, ctx, "not found"),
        }
    }

    fn on_list_files(&self, inner: &Packet, ctx: &PacketContext) -> HandlerResult {
        let dir = self.customer_dir_for(&inner.owner_id);
        let mut segments = Vec::new();
        if let Ok(entries) = std::fs::read_dir(&dir) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                if name == INDEX_PREFIX || name.ends_with(".rev") {
                    continue;
                }
                segments.push(decode_name(&name));
            }
        }
        segments.sort();

        let index_revision = std::fs::read_to_string(dir.join("index.rev"))
            .ok()
            .and_then(|text| text.trim().parse().ok());
        let listing = FilesListing {
            segments,
            index_revision,
        };
        let Ok(payload) = to_payload(&listing) else {
            return self.fail(inner, ctx, "listing failed");
        };
        let response = Packet::outgoing(
            Command::Files,
            inner.packet_id.clone(),
            self.me.clone(),
            inner.creator_id.clone(),
            payload,
        )
        .sign(&self.signer);
        let _ = self.gateway.enqueue(&ctx.peer, &response);
        HandlerResult::Consumed
    }

    fn on_delete_file(&self, inner: &Packet, ctx: &PacketContext) -> HandlerResult {
        let Ok(segment) = SegmentId::parse(&inner.packet_id) else {
            return self.fail(inner, ctx, "bad segment id");
        };
        let path = self
            .customer_dir(&segment)
            .join(encode_name(&segment.to_string()));
        let removed = std::fs::remove_file(&path).is_ok();
        debug!(segment = %segment, removed, "segment delete");
        self.answer(inner, ctx, &ServiceAck::accepted());
        HandlerResult::Consumed
    }

    fn on_delete_backup(&self, inner: &Packet, ctx: &PacketContext) -> HandlerResult {
        // The payload names the backup ID whose segments all go.
        let Ok(backup_id) = String::from_utf8(inner.payload.clone()) else {
            return self.fail(inner, ctx, "bad backup id");
        };
        let prefix = encode_name(&backup_id);
        let dir = self.customer_dir_for(&inner.owner_id);
        let mut removed = 0usize;
        if let Ok(entries) = std::fs::read_dir(&dir) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with(&prefix) && std::fs::remove_file(entry.path()).is_ok() {
                    removed += 1;
                }
            }
        }
        info!(backup_id = %backup_id, removed, "backup deleted");
        self.answer(inner, ctx, &ServiceAck::accepted());
        HandlerResult::Consumed
    }

    fn store_index(
        &self,
        customer: &IdUrl,
        revision: u64,
        payload: &[u8],
    ) -> std::result::Result<(), String> {
        let dir = self.customer_dir_for(customer);
        write_file(&dir.join(INDEX_PREFIX), payload)?;
        write_file(&dir.join("index.rev"), revision.to_string().as_bytes())?;
        debug!(customer = %customer, revision, "index replica stored");
        Ok(())
    }

    /// The per-customer directory a segment belongs in; keyed by user and
    /// host so every key alias of one customer shares a directory.
    fn customer_dir(&self, segment: &SegmentId) -> PathBuf {
        let customer = &segment.backup_id.customer;
        self.root.join(format!("{}@{}", customer.user, customer.host))
    }

    /// The per-customer directory by the customer's identity URL.
    fn customer_dir_for(&self, customer: &IdUrl) -> PathBuf {
        self.root
            .join(format!("{}@{}", customer.user_name(), customer.host()))
    }

    fn respond_data(&self, request: &Packet, ctx: &PacketContext, payload: Vec<u8>) {
        let response = Packet::outgoing(
            Command::Data,
            request.packet_id.clone(),
            self.me.clone(),
            request.creator_id.clone(),
            payload,
        )
        .sign(&self.signer);
        let _ = self.gateway.enqueue(&ctx.peer, &response);
    }

    fn answer(&self, request: &Packet, ctx: &PacketContext, ack: &ServiceAck) {
        let Ok(payload) = to_payload(ack) else {
            return;
        };
        let response = Packet::ack(request, self.me.clone(), payload).sign(&self.signer);
        if let Err(err) = self.gateway.enqueue(&ctx.peer, &response) {
            warn!(peer = %ctx.peer, error = %err, "supplier answer undeliverable");
        }
    }

    fn fail(&self, request: &Packet, ctx: &PacketContext, reason: &str) -> HandlerResult {
        let response = Packet::fail(request, self.me.clone(), reason).sign(&self.signer);
        let _ = self.gateway.enqueue(&ctx.peer, &response);
        HandlerResult::Consumed
    }

    fn lock_grants(&self) -> MutexGuard<'_, HashMap<IdUrl, u64>> {
        match self.grants.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// `index-<revision>` packet IDs mark index replica uploads.
fn parse_index_id(packet_id: &str) -> Option<u64> {
    packet_id
        .strip_prefix("index-")
        .and_then(|rev| rev.parse().ok())
}

/// Segment IDs contain `/`; fold to `#` for a flat file name.
fn encode_name(segment_id: &str) -> String {
    segment_id.replace('/', "#")
}

fn decode_name(file_name: &str) -> String {
    file_name.replace('#', "/")
}

fn write_file(path: &PathBuf, bytes: &[u8]) -> std::result::Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes).map_err(|e| e.to_string())?;
    std::fs::rename(&tmp, path).map_err(|e| e.to_string())
}

fn dir_size(dir: &PathBuf) -> u64 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}
