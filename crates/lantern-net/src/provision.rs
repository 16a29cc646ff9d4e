//! Provisioning: bulk chain-data requests split across protocol messages.
//!
//! A provision names what the client wants (headers, bodies, proofs, ...).
//! The protocol caps how many items one request message may carry, so a
//! provisioner slices the provision into numbered request messages, feeds
//! them to the peer one per writable tick, and reassembles the responses in
//! request order regardless of arrival order.

use crate::message::{
    LightMessage, LightPayload, LightProtocolKind, RequestCall, ResponseData, Transaction,
};
use crate::protocol::LightProtocol;

pub use crate::message::{
    AccountProof, AccountState, Address, BlockBody, BlockHeader, Hash256,
    TransactionReceipts, TransactionStatus,
};

/// The kinds of data a provision can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionKind {
    /// Block headers by range.
    BlockHeaders,
    /// Account proofs by block number.
    AccountProofs,
    /// Block bodies by hash.
    BlockBodies,
    /// Block receipts by hash.
    TransactionReceipts,
    /// Account states by block hash.
    Accounts,
    /// Transaction statuses by hash.
    TransactionStatuses,
    /// Broadcast one signed transaction.
    SubmitTransaction,
}

/// A bulk request together with its accumulated results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provision {
    /// Headers over a block range.
    Headers {
        /// First block number.
        start: u64,
        /// Blocks skipped between consecutive headers.
        skip: u64,
        /// Headers wanted.
        limit: u64,
        /// Walk the range downward.
        reverse: bool,
        /// Collected headers, in request order.
        headers: Vec<BlockHeader>,
    },
    /// Account proofs at the named blocks.
    Proofs {
        /// Block numbers to prove at.
        numbers: Vec<u64>,
        /// Collected proofs.
        proofs: Vec<AccountProof>,
    },
    /// Bodies of the named blocks.
    Bodies {
        /// Block hashes.
        hashes: Vec<Hash256>,
        /// Collected bodies.
        bodies: Vec<BlockBody>,
    },
    /// Receipts of the named blocks.
    Receipts {
        /// Block hashes.
        hashes: Vec<Hash256>,
        /// Collected receipts.
        receipts: Vec<TransactionReceipts>,
    },
    /// One account's state at the named blocks.
    Accounts {
        /// The account queried.
        address: Address,
        /// Block hashes to query at.
        hashes: Vec<Hash256>,
        /// Collected states.
        accounts: Vec<AccountState>,
    },
    /// Statuses of the named transactions.
    Statuses {
        /// Transaction hashes.
        hashes: Vec<Hash256>,
        /// Collected statuses.
        statuses: Vec<TransactionStatus>,
    },
    /// Broadcast a transaction, then query its status.
    Submission {
        /// The signed transaction.
        transaction: Transaction,
        /// Its status once the follow-up query is answered.
        status: Option<TransactionStatus>,
    },
}

impl Provision {
    /// The kind of data this provision asks for.
    #[must_use]
    pub fn kind(&self) -> ProvisionKind {
        match self {
            Provision::Headers { .. } => ProvisionKind::BlockHeaders,
            Provision::Proofs { .. } => ProvisionKind::AccountProofs,
            Provision::Bodies { .. } => ProvisionKind::BlockBodies,
            Provision::Receipts { .. } => ProvisionKind::TransactionReceipts,
            Provision::Accounts { .. } => ProvisionKind::Accounts,
            Provision::Statuses { .. } => ProvisionKind::TransactionStatuses,
            Provision::Submission { .. } => ProvisionKind::SubmitTransaction,
        }
    }

    /// How many items this provision asks for.
    #[must_use]
    pub fn item_count(&self) -> usize {
        match self {
            Provision::Headers { limit, .. } => *limit as usize,
            Provision::Proofs { numbers, .. } => numbers.len(),
            Provision::Bodies { hashes, .. } => hashes.len(),
            Provision::Receipts { hashes, .. } => hashes.len(),
            Provision::Accounts { hashes, .. } => hashes.len(),
            Provision::Statuses { hashes, .. } => hashes.len(),
            Provision::Submission { .. } => 1,
        }
    }
}

/// Why a provision came back without its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionErrorReason {
    /// The node disconnected before the provision completed.
    NodeInactive,
    /// The node answered with data of the wrong shape.
    NodeData,
}

/// The outcome of a provision, delivered once per provision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionResult {
    /// The caller's identifier for the provision.
    pub identifier: u64,
    /// The provision with whatever data arrived.
    pub provision: Provision,
    /// Whether every response carried usable data.
    pub status: Result<(), ProvisionErrorReason>,
}

/// How many request messages a provision needs at a given content limit.
///
/// A submission is always two messages: the submit itself and a status query
/// for the transaction hash.
#[must_use]
pub fn required_messages(provision: &Provision, content_limit: usize) -> usize {
    match provision {
        Provision::Submission { .. } => 2,
        _ => provision.item_count().div_ceil(content_limit.max(1)).max(1),
    }
}

/// One in-flight provision: its numbered request messages and the responses
/// collected so far.
pub(crate) struct Provisioner {
    identifier: u64,
    provision: Provision,
    message_identifier: u64,
    message_count: usize,
    messages: Vec<LightMessage>,
    messages_sent: usize,
    messages_received: usize,
    parts: Vec<Option<ResponseData>>,
    status: Result<(), ProvisionErrorReason>,
}

impl Provisioner {
    pub(crate) fn new(
        identifier: u64,
        provision: Provision,
        base_message_id: u64,
        protocol: &dyn LightProtocol,
    ) -> Self {
        let content_limit = protocol.content_limit(provision.kind());
        let message_count = required_messages(&provision, content_limit);
        let messages =
            build_messages(&provision, base_message_id, message_count, content_limit, protocol.kind());
        // A submission's first message gets no response.
        let messages_received = match provision {
            Provision::Submission { .. } => 1,
            _ => 0,
        };
        Self {
            identifier,
            provision,
            message_identifier: base_message_id,
            message_count,
            messages,
            messages_sent: 0,
            messages_received,
            parts: (0..message_count).map(|_| None).collect(),
            status: Ok(()),
        }
    }

    pub(crate) fn identifier(&self) -> u64 {
        self.identifier
    }

    pub(crate) fn message_count(&self) -> usize {
        self.message_count
    }

    /// Whether `request_id` names one of this provisioner's messages.
    pub(crate) fn owns(&self, request_id: u64) -> bool {
        request_id >= self.message_identifier
            && request_id < self.message_identifier + self.message_count as u64
    }

    pub(crate) fn send_pending(&self) -> bool {
        self.messages_sent < self.message_count
    }

    /// The next unsent request message, at most one per call.
    pub(crate) fn next_message(&mut self) -> Option<&LightMessage> {
        if self.messages_sent < self.messages.len() {
            let message = &self.messages[self.messages_sent];
            self.messages_sent += 1;
            Some(message)
        } else {
            None
        }
    }

    /// Stash a response. Returns the completed result once every expected
    /// response has arrived.
    pub(crate) fn handle_response(
        &mut self,
        request_id: u64,
        data: ResponseData,
    ) -> Option<ProvisionResult> {
        debug_assert!(self.owns(request_id));
        let index = (request_id - self.message_identifier) as usize;

        if response_matches(&self.provision, &data) {
            self.parts[index] = Some(data);
        } else {
            // Wrong-shaped data still consumes the slot; the provision
            // completes with an error status.
            self.status = Err(ProvisionErrorReason::NodeData);
        }
        self.messages_received += 1;

        if self.messages_received < self.message_count {
            return None;
        }

        let mut provision = self.provision.clone();
        for part in self.parts.iter_mut() {
            if let Some(data) = part.take() {
                absorb(&mut provision, data);
            }
        }
        Some(ProvisionResult {
            identifier: self.identifier,
            provision,
            status: self.status,
        })
    }

    /// Abandon the provision, handing its definition back to the caller.
    pub(crate) fn into_provision(self) -> (u64, Provision) {
        (self.identifier, self.provision)
    }
}

fn response_matches(provision: &Provision, data: &ResponseData) -> bool {
    matches!(
        (provision, data),
        (Provision::Headers { .. }, ResponseData::Headers(_))
            | (Provision::Proofs { .. }, ResponseData::Proofs(_))
            | (Provision::Bodies { .. }, ResponseData::Bodies(_))
            | (Provision::Receipts { .. }, ResponseData::Receipts(_))
            | (Provision::Accounts { .. }, ResponseData::Accounts(_))
            | (Provision::Statuses { .. }, ResponseData::Statuses(_))
            | (Provision::Submission { .. }, ResponseData::Statuses(_))
            | (Provision::Submission { .. }, ResponseData::Submission(_))
    )
}

fn absorb(provision: &mut Provision, data: ResponseData) {
    match (provision, data) {
        (Provision::Headers { headers, .. }, ResponseData::Headers(more)) => {
            headers.extend(more);
        }
        (Provision::Proofs { proofs, .. }, ResponseData::Proofs(more)) => {
            proofs.extend(more);
        }
        (Provision::Bodies { bodies, .. }, ResponseData::Bodies(more)) => {
            bodies.extend(more);
        }
        (Provision::Receipts { receipts, .. }, ResponseData::Receipts(more)) => {
            receipts.extend(more);
        }
        (Provision::Accounts { accounts, .. }, ResponseData::Accounts(more)) => {
            accounts.extend(more);
        }
        (Provision::Statuses { statuses, .. }, ResponseData::Statuses(more)) => {
            statuses.extend(more);
        }
        (Provision::Submission { status, .. }, ResponseData::Statuses(mut more)) => {
            *status = more.drain(..).next();
        }
        (Provision::Submission { status, .. }, ResponseData::Submission(value)) => {
            *status = Some(value);
        }
        _ => {}
    }
}

fn chunk<T: Clone>(items: &[T], index: usize, limit: usize) -> Vec<T> {
    let start = index * limit;
    let end = (start + limit).min(items.len());
    items[start..end].to_vec()
}

fn build_messages(
    provision: &Provision,
    base_message_id: u64,
    message_count: usize,
    content_limit: usize,
    protocol: LightProtocolKind,
) -> Vec<LightMessage> {
    let mut messages = Vec::with_capacity(message_count);
    for index in 0..message_count {
        let request_id = base_message_id + index as u64;
        let call = match provision {
            Provision::Headers {
                start,
                skip,
                limit,
                reverse,
                ..
            } => {
                let offset = (index * content_limit) as u64 * (skip + 1);
                let message_start = if *reverse {
                    start.saturating_sub(offset)
                } else {
                    start + offset
                };
                let remaining = *limit - (index * content_limit) as u64;
                RequestCall::Headers {
                    start: message_start,
                    skip: *skip,
                    limit: remaining.min(content_limit as u64),
                    reverse: *reverse,
                }
            }
            Provision::Proofs { numbers, .. } => {
                RequestCall::Proofs(chunk(numbers, index, content_limit))
            }
            Provision::Bodies { hashes, .. } => {
                RequestCall::Bodies(chunk(hashes, index, content_limit))
            }
            Provision::Receipts { hashes, .. } => {
                RequestCall::Receipts(chunk(hashes, index, content_limit))
            }
            Provision::Accounts {
                address, hashes, ..
            } => RequestCall::Accounts {
                address: *address,
                hashes: chunk(hashes, index, content_limit),
            },
            Provision::Statuses { hashes, .. } => {
                RequestCall::Statuses(chunk(hashes, index, content_limit))
            }
            Provision::Submission { transaction, .. } => {
                if index == 0 {
                    RequestCall::SubmitTransaction(transaction.clone())
                } else {
                    RequestCall::Statuses(vec![transaction.hash])
                }
            }
        };
        messages.push(LightMessage {
            protocol,
            payload: LightPayload::Request { request_id, call },
        });
    }
    messages
}
