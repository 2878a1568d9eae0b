//! # OpenWire Data Structures
//!
//! The closed set of data structures this gateway understands, one enum
//! variant per wire type code.
//!
//! Commands embed a [`BaseCommand`] header. Sub-structures that the wire
//! format shares through the reference cache (identifiers and destinations)
//! are held as [`StructureRef`]s: the cache tracks *identity*, so two fields
//! pointing at the same `Arc` are encoded once and decode back to one shared
//! `Arc`, while equal values behind distinct `Arc`s are encoded twice.

use std::sync::Arc;

use crate::openwire::primitive_map::PrimitiveMap;

/// Shared handle to a cache-eligible sub-structure
pub type StructureRef = Arc<DataStructure>;

/// Wire type codes
pub mod types {
    pub const NULL: u8 = 0;
    pub const WIREFORMAT_INFO: u8 = 1;
    pub const CONNECTION_INFO: u8 = 3;
    pub const SESSION_INFO: u8 = 4;
    pub const PRODUCER_INFO: u8 = 6;
    pub const TRANSACTION_INFO: u8 = 7;
    pub const KEEP_ALIVE_INFO: u8 = 10;
    pub const SHUTDOWN_INFO: u8 = 11;
    pub const REMOVE_INFO: u8 = 12;
    pub const CONNECTION_ERROR: u8 = 16;
    pub const RESPONSE: u8 = 30;
    pub const EXCEPTION_RESPONSE: u8 = 31;

    pub const QUEUE: u8 = 100;
    pub const TOPIC: u8 = 101;
    pub const TEMP_QUEUE: u8 = 102;
    pub const TEMP_TOPIC: u8 = 103;
    pub const LOCAL_TRANSACTION_ID: u8 = 111;
    pub const CONNECTION_ID: u8 = 120;
    pub const SESSION_ID: u8 = 121;
    pub const CONSUMER_ID: u8 = 122;
    pub const PRODUCER_ID: u8 = 123;
    pub const BROKER_ID: u8 = 124;
}

/// Magic bytes carried by every WireFormatInfo
pub const OPENWIRE_MAGIC: [u8; 8] = *b"ActiveMQ";

/// Header shared by every command, always marshalled first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BaseCommand {
    pub command_id: i32,
    pub response_required: bool,
}

/// Implemented by every concrete data structure type
pub trait Variant: Sized {
    /// Wire type code
    const TYPE: u8;
    /// Variant name used in error messages
    const NAME: &'static str;

    fn as_variant(structure: &DataStructure) -> Option<&Self>;
    fn as_variant_mut(structure: &mut DataStructure) -> Option<&mut Self>;
    fn into_variant(structure: DataStructure) -> std::result::Result<Self, DataStructure>;
}

macro_rules! data_structures {
    ($( $(#[$meta:meta])* $variant:ident = $code:path, )*) => {
        /// Every data structure this codec can marshal, keyed by type code
        #[derive(Debug, Clone, PartialEq)]
        pub enum DataStructure {
            $( $(#[$meta])* $variant($variant), )*
        }

        impl DataStructure {
            /// Wire type code of this structure
            pub fn data_structure_type(&self) -> u8 {
                match self {
                    $( DataStructure::$variant(_) => $code, )*
                }
            }

            pub fn name(&self) -> &'static str {
                match self {
                    $( DataStructure::$variant(_) => stringify!($variant), )*
                }
            }
        }

        $(
            impl From<$variant> for DataStructure {
                fn from(value: $variant) -> Self {
                    DataStructure::$variant(value)
                }
            }

            impl Variant for $variant {
                const TYPE: u8 = $code;
                const NAME: &'static str = stringify!($variant);

                fn as_variant(structure: &DataStructure) -> Option<&Self> {
                    match structure {
                        DataStructure::$variant(value) => Some(value),
                        _ => None,
                    }
                }

                fn as_variant_mut(structure: &mut DataStructure) -> Option<&mut Self> {
                    match structure {
                        DataStructure::$variant(value) => Some(value),
                        _ => None,
                    }
                }

                fn into_variant(structure: DataStructure) -> std::result::Result<Self, DataStructure> {
                    match structure {
                        DataStructure::$variant(value) => Ok(value),
                        other => Err(other),
                    }
                }
            }
        )*
    };
}

data_structures! {
    WireFormatInfo = types::WIREFORMAT_INFO,
    ConnectionInfo = types::CONNECTION_INFO,
    SessionInfo = types::SESSION_INFO,
    ProducerInfo = types::PRODUCER_INFO,
    TransactionInfo = types::TRANSACTION_INFO,
    KeepAliveInfo = types::KEEP_ALIVE_INFO,
    ShutdownInfo = types::SHUTDOWN_INFO,
    RemoveInfo = types::REMOVE_INFO,
    ConnectionError = types::CONNECTION_ERROR,
    Response = types::RESPONSE,
    ExceptionResponse = types::EXCEPTION_RESPONSE,
    Queue = types::QUEUE,
    Topic = types::TOPIC,
    TempQueue = types::TEMP_QUEUE,
    TempTopic = types::TEMP_TOPIC,
    LocalTransactionId = types::LOCAL_TRANSACTION_ID,
    ConnectionId = types::CONNECTION_ID,
    SessionId = types::SESSION_ID,
    ConsumerId = types::CONSUMER_ID,
    ProducerId = types::PRODUCER_ID,
    BrokerId = types::BROKER_ID,
}

impl DataStructure {
    /// Header of command variants, `None` for plain data structures
    pub fn base_command(&self) -> Option<&BaseCommand> {
        match self {
            DataStructure::ConnectionInfo(c) => Some(&c.base),
            DataStructure::SessionInfo(c) => Some(&c.base),
            DataStructure::ProducerInfo(c) => Some(&c.base),
            DataStructure::TransactionInfo(c) => Some(&c.base),
            DataStructure::KeepAliveInfo(c) => Some(&c.base),
            DataStructure::ShutdownInfo(c) => Some(&c.base),
            DataStructure::RemoveInfo(c) => Some(&c.base),
            DataStructure::ConnectionError(c) => Some(&c.base),
            DataStructure::Response(c) => Some(&c.base),
            DataStructure::ExceptionResponse(c) => Some(&c.base),
            _ => None,
        }
    }

    pub fn is_command(&self) -> bool {
        self.base_command().is_some() || matches!(self, DataStructure::WireFormatInfo(_))
    }

    pub fn is_destination(&self) -> bool {
        matches!(
            self,
            DataStructure::Queue(_)
                | DataStructure::Topic(_)
                | DataStructure::TempQueue(_)
                | DataStructure::TempTopic(_)
        )
    }

    /// Wrap in a [`StructureRef`] for use in a cached field
    pub fn shared(self) -> StructureRef {
        Arc::new(self)
    }
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionId {
    pub value: Option<String>,
}

impl ConnectionId {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionId {
    pub connection_id: Option<String>,
    pub value: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerId {
    pub connection_id: Option<String>,
    pub session_id: i64,
    pub value: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProducerId {
    pub connection_id: Option<String>,
    pub value: i64,
    pub session_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerId {
    pub value: Option<String>,
}

/// Transaction scoped to one connection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalTransactionId {
    pub value: i64,
    /// Cached reference to a [`ConnectionId`]
    pub connection_id: Option<StructureRef>,
}

// ---------------------------------------------------------------------------
// Destinations
// ---------------------------------------------------------------------------

macro_rules! destinations {
    ($( $(#[$meta:meta])* $name:ident ),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Default, PartialEq, Eq)]
            pub struct $name {
                pub physical_name: Option<String>,
            }

            impl $name {
                pub fn new(physical_name: impl Into<String>) -> Self {
                    Self {
                        physical_name: Some(physical_name.into()),
                    }
                }
            }
        )*
    };
}

destinations! {
    Queue,
    Topic,
    TempQueue,
    TempTopic,
}

// ---------------------------------------------------------------------------
// Errors carried by commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackTraceElement {
    pub class_name: Option<String>,
    pub method_name: Option<String>,
    pub file_name: Option<String>,
    pub line_number: i32,
}

/// Remote exception. Stack trace and cause travel only when the session
/// negotiated stack traces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerError {
    pub exception_class: Option<String>,
    pub message: Option<String>,
    pub stack_trace: Vec<StackTraceElement>,
    pub cause: Option<Box<BrokerError>>,
}

impl BrokerError {
    pub fn new(exception_class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            exception_class: Some(exception_class.into()),
            message: Some(message.into()),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Handshake command. Not a [`BaseCommand`]: it carries no command id.
#[derive(Debug, Clone, PartialEq)]
pub struct WireFormatInfo {
    pub magic: [u8; 8],
    pub version: i32,
    pub properties: Option<PrimitiveMap>,
}

impl Default for WireFormatInfo {
    fn default() -> Self {
        Self {
            magic: OPENWIRE_MAGIC,
            version: 0,
            properties: None,
        }
    }
}

impl WireFormatInfo {
    pub fn is_valid(&self) -> bool {
        self.magic == OPENWIRE_MAGIC
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionInfo {
    pub base: BaseCommand,
    /// Cached [`ConnectionId`]
    pub connection_id: Option<StructureRef>,
    pub client_id: Option<String>,
    pub password: Option<String>,
    pub user_name: Option<String>,
    pub broker_path: Option<Vec<BrokerId>>,
    pub broker_master_connector: bool,
    pub manageable: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionInfo {
    pub base: BaseCommand,
    /// Cached [`SessionId`]
    pub session_id: Option<StructureRef>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProducerInfo {
    pub base: BaseCommand,
    /// Cached [`ProducerId`]
    pub producer_id: Option<StructureRef>,
    /// Cached destination
    pub destination: Option<StructureRef>,
    pub broker_path: Option<Vec<BrokerId>>,
}

pub mod transaction_type {
    pub const BEGIN: u8 = 0;
    pub const PREPARE: u8 = 1;
    pub const COMMIT_ONE_PHASE: u8 = 2;
    pub const COMMIT_TWO_PHASE: u8 = 3;
    pub const ROLLBACK: u8 = 4;
    pub const RECOVER: u8 = 5;
    pub const FORGET: u8 = 6;
    pub const END: u8 = 7;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionInfo {
    pub base: BaseCommand,
    /// Cached [`ConnectionId`]
    pub connection_id: Option<StructureRef>,
    /// Cached [`LocalTransactionId`]
    pub transaction_id: Option<StructureRef>,
    /// One of [`transaction_type`]
    pub transaction_type: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeepAliveInfo {
    pub base: BaseCommand,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownInfo {
    pub base: BaseCommand,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoveInfo {
    pub base: BaseCommand,
    /// Cached identifier of the removed connection, session, consumer or producer
    pub object_id: Option<StructureRef>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionError {
    pub base: BaseCommand,
    pub exception: Option<BrokerError>,
    pub connection_id: Option<ConnectionId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub base: BaseCommand,
    pub correlation_id: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExceptionResponse {
    pub base: BaseCommand,
    pub correlation_id: i32,
    pub exception: Option<BrokerError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_codes_follow_variant() {
        let info: DataStructure = TransactionInfo::default().into();
        assert_eq!(info.data_structure_type(), types::TRANSACTION_INFO);
        assert_eq!(info.name(), "TransactionInfo");
        assert!(info.is_command());

        let id: DataStructure = ConnectionId::new("ID:gw-1").into();
        assert_eq!(id.data_structure_type(), types::CONNECTION_ID);
        assert!(!id.is_command());
        assert!(DataStructure::from(Queue::new("orders")).is_destination());
    }

    #[test]
    fn test_variant_accessors() {
        let mut ds: DataStructure = Response {
            correlation_id: 7,
            ..Response::default()
        }
        .into();
        assert!(TransactionInfo::as_variant(&ds).is_none());
        if let Some(r) = Response::as_variant_mut(&mut ds) {
            r.correlation_id = 8;
        }
        let r = Response::into_variant(ds).ok();
        assert_eq!(r.map(|r| r.correlation_id), Some(8));
    }

    #[test]
    fn test_wire_format_info_magic() {
        assert!(WireFormatInfo::default().is_valid());
        let bad = WireFormatInfo {
            magic: *b"NotAMQ!!",
            ..WireFormatInfo::default()
        };
        assert!(!bad.is_valid());
    }
}
