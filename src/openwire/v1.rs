//! # OpenWire v1 Marshallers
//!
//! Field layouts for every data structure at protocol version 1.
//!
//! Each impl lists its fields in wire order. The same order is used by both
//! tight passes, the tight unmarshal and the loose pair, and the base command
//! header always comes first. Reordering fields here breaks every peer on
//! the same version.

use crate::core::boolean_stream::BooleanStream;
use crate::core::data_stream::{DataInput, DataOutput};
use crate::error::{constants, ProtocolError, Result};
use crate::openwire::command::*;
use crate::openwire::marshal::*;
use crate::openwire::primitive_map;
use crate::openwire::wire_format::OpenWireFormat;

/// All marshallers registered for version 1
pub(crate) fn marshallers() -> Vec<&'static dyn DataStreamMarshaller> {
    macro_rules! register {
        ($($ty:ident),* $(,)?) => {
            vec![$({
                static MARSHALLER: TypedMarshaller<$ty> = TypedMarshaller::new();
                &MARSHALLER as &'static dyn DataStreamMarshaller
            }),*]
        };
    }

    register![
        WireFormatInfo,
        ConnectionInfo,
        SessionInfo,
        ProducerInfo,
        TransactionInfo,
        KeepAliveInfo,
        ShutdownInfo,
        RemoveInfo,
        ConnectionError,
        Response,
        ExceptionResponse,
        Queue,
        Topic,
        TempQueue,
        TempTopic,
        LocalTransactionId,
        ConnectionId,
        SessionId,
        ConsumerId,
        ProducerId,
        BrokerId,
    ]
}

const CONNECTION_ID: FieldKind = FieldKind {
    name: ConnectionId::NAME,
    accept: |o| matches!(o, DataStructure::ConnectionId(_)),
};

const TRANSACTION_ID: FieldKind = FieldKind {
    name: LocalTransactionId::NAME,
    accept: |o| matches!(o, DataStructure::LocalTransactionId(_)),
};

const SESSION_ID: FieldKind = FieldKind {
    name: SessionId::NAME,
    accept: |o| matches!(o, DataStructure::SessionId(_)),
};

const PRODUCER_ID: FieldKind = FieldKind {
    name: ProducerId::NAME,
    accept: |o| matches!(o, DataStructure::ProducerId(_)),
};

const DESTINATION: FieldKind = FieldKind {
    name: "Destination",
    accept: DataStructure::is_destination,
};

/// Anything `RemoveInfo` can retire
const OBJECT_ID: FieldKind = FieldKind {
    name: "identifier",
    accept: |o| {
        matches!(
            o,
            DataStructure::ConnectionId(_)
                | DataStructure::SessionId(_)
                | DataStructure::ConsumerId(_)
                | DataStructure::ProducerId(_)
        )
    },
};

// ---------------------------------------------------------------------------
// TransactionInfo
//
// base, connection_id (cached), transaction_id (cached), transaction_type (1)
// ---------------------------------------------------------------------------

impl Marshal for TransactionInfo {
    fn tight_marshal1(&self, wf: &mut OpenWireFormat, bs: &mut BooleanStream) -> Result<usize> {
        let mut rc = tight_marshal_base1(&self.base, bs)?;
        rc += tight_marshal_cached1(wf, CONNECTION_ID, self.connection_id.as_ref(), bs)?;
        rc += tight_marshal_cached1(wf, TRANSACTION_ID, self.transaction_id.as_ref(), bs)?;
        Ok(rc + 1)
    }

    fn tight_marshal2(
        &self,
        wf: &mut OpenWireFormat,
        out: &mut DataOutput,
        bs: &mut BooleanStream,
    ) -> Result<()> {
        tight_marshal_base2(&self.base, out, bs)?;
        tight_marshal_cached2(wf, self.connection_id.as_ref(), out, bs)?;
        tight_marshal_cached2(wf, self.transaction_id.as_ref(), out, bs)?;
        out.write_u8(self.transaction_type);
        Ok(())
    }

    fn tight_unmarshal(
        &mut self,
        wf: &mut OpenWireFormat,
        input: &mut DataInput<'_>,
        bs: &mut BooleanStream,
    ) -> Result<()> {
        tight_unmarshal_base(&mut self.base, input, bs)?;
        self.connection_id = expect_kind(tight_unmarshal_cached(wf, input, bs)?, CONNECTION_ID)?;
        self.transaction_id = expect_kind(tight_unmarshal_cached(wf, input, bs)?, TRANSACTION_ID)?;
        self.transaction_type = input.read_u8()?;
        Ok(())
    }

    fn loose_marshal(&self, wf: &mut OpenWireFormat, out: &mut DataOutput) -> Result<()> {
        loose_marshal_base(&self.base, out);
        loose_marshal_cached(wf, CONNECTION_ID, self.connection_id.as_ref(), out)?;
        loose_marshal_cached(wf, TRANSACTION_ID, self.transaction_id.as_ref(), out)?;
        out.write_u8(self.transaction_type);
        Ok(())
    }

    fn loose_unmarshal(&mut self, wf: &mut OpenWireFormat, input: &mut DataInput<'_>) -> Result<()> {
        loose_unmarshal_base(&mut self.base, input)?;
        self.connection_id = expect_kind(loose_unmarshal_cached(wf, input)?, CONNECTION_ID)?;
        self.transaction_id = expect_kind(loose_unmarshal_cached(wf, input)?, TRANSACTION_ID)?;
        self.transaction_type = input.read_u8()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// WireFormatInfo
//
// magic (8, fixed), version (4), properties (byte sequence)
// No base command header.
// ---------------------------------------------------------------------------

impl WireFormatInfo {
    fn marshalled_properties(&self) -> Result<Option<Vec<u8>>> {
        self.properties
            .as_ref()
            .map(primitive_map::map_to_bytes)
            .transpose()
    }

    fn set_marshalled_properties(&mut self, raw: Option<Vec<u8>>) -> Result<()> {
        self.properties = match raw {
            Some(raw) => primitive_map::unmarshal_map(&mut DataInput::new(&raw))?,
            None => None,
        };
        Ok(())
    }

    fn read_magic(&mut self, input: &mut DataInput<'_>) -> Result<()> {
        self.magic.copy_from_slice(input.read_bytes(OPENWIRE_MAGIC.len())?);
        if !self.is_valid() {
            return Err(ProtocolError::InvalidData(constants::ERR_BAD_MAGIC));
        }
        Ok(())
    }
}

impl Marshal for WireFormatInfo {
    fn tight_marshal1(&self, _wf: &mut OpenWireFormat, bs: &mut BooleanStream) -> Result<usize> {
        let properties = self.marshalled_properties()?;
        let rc = self.magic.len() + tight_marshal_bytes1(properties.as_deref(), bs)?;
        Ok(rc + 4)
    }

    fn tight_marshal2(
        &self,
        _wf: &mut OpenWireFormat,
        out: &mut DataOutput,
        bs: &mut BooleanStream,
    ) -> Result<()> {
        out.write_bytes(&self.magic);
        out.write_i32(self.version);
        tight_marshal_bytes2(self.marshalled_properties()?.as_deref(), out, bs)
    }

    fn tight_unmarshal(
        &mut self,
        _wf: &mut OpenWireFormat,
        input: &mut DataInput<'_>,
        bs: &mut BooleanStream,
    ) -> Result<()> {
        self.read_magic(input)?;
        self.version = input.read_i32()?;
        let raw = tight_unmarshal_bytes(input, bs)?;
        self.set_marshalled_properties(raw)
    }

    fn loose_marshal(&self, _wf: &mut OpenWireFormat, out: &mut DataOutput) -> Result<()> {
        out.write_bytes(&self.magic);
        out.write_i32(self.version);
        loose_marshal_bytes(self.marshalled_properties()?.as_deref(), out);
        Ok(())
    }

    fn loose_unmarshal(&mut self, _wf: &mut OpenWireFormat, input: &mut DataInput<'_>) -> Result<()> {
        self.read_magic(input)?;
        self.version = input.read_i32()?;
        let raw = loose_unmarshal_bytes(input)?;
        self.set_marshalled_properties(raw)
    }
}

// ---------------------------------------------------------------------------
// ConnectionInfo
//
// base, connection_id (cached), client_id, password, user_name,
// broker_path (BrokerId[]), broker_master_connector (bool), manageable (bool)
// ---------------------------------------------------------------------------

impl Marshal for ConnectionInfo {
    fn tight_marshal1(&self, wf: &mut OpenWireFormat, bs: &mut BooleanStream) -> Result<usize> {
        let mut rc = tight_marshal_base1(&self.base, bs)?;
        rc += tight_marshal_cached1(wf, CONNECTION_ID, self.connection_id.as_ref(), bs)?;
        rc += tight_marshal_string1(self.client_id.as_deref(), bs)?;
        rc += tight_marshal_string1(self.password.as_deref(), bs)?;
        rc += tight_marshal_string1(self.user_name.as_deref(), bs)?;
        rc += tight_marshal_array1(wf, self.broker_path.as_deref(), bs)?;
        bs.write_boolean(self.broker_master_connector)?;
        bs.write_boolean(self.manageable)?;
        Ok(rc)
    }

    fn tight_marshal2(
        &self,
        wf: &mut OpenWireFormat,
        out: &mut DataOutput,
        bs: &mut BooleanStream,
    ) -> Result<()> {
        tight_marshal_base2(&self.base, out, bs)?;
        tight_marshal_cached2(wf, self.connection_id.as_ref(), out, bs)?;
        tight_marshal_string2(self.client_id.as_deref(), out, bs)?;
        tight_marshal_string2(self.password.as_deref(), out, bs)?;
        tight_marshal_string2(self.user_name.as_deref(), out, bs)?;
        tight_marshal_array2(wf, self.broker_path.as_deref(), out, bs)?;
        bs.read_boolean()?;
        bs.read_boolean()?;
        Ok(())
    }

    fn tight_unmarshal(
        &mut self,
        wf: &mut OpenWireFormat,
        input: &mut DataInput<'_>,
        bs: &mut BooleanStream,
    ) -> Result<()> {
        tight_unmarshal_base(&mut self.base, input, bs)?;
        self.connection_id = expect_kind(tight_unmarshal_cached(wf, input, bs)?, CONNECTION_ID)?;
        self.client_id = tight_unmarshal_string(input, bs)?;
        self.password = tight_unmarshal_string(input, bs)?;
        self.user_name = tight_unmarshal_string(input, bs)?;
        self.broker_path = tight_unmarshal_array(wf, input, bs)?;
        self.broker_master_connector = bs.read_boolean()?;
        self.manageable = bs.read_boolean()?;
        Ok(())
    }

    fn loose_marshal(&self, wf: &mut OpenWireFormat, out: &mut DataOutput) -> Result<()> {
        loose_marshal_base(&self.base, out);
        loose_marshal_cached(wf, CONNECTION_ID, self.connection_id.as_ref(), out)?;
        loose_marshal_string(self.client_id.as_deref(), out)?;
        loose_marshal_string(self.password.as_deref(), out)?;
        loose_marshal_string(self.user_name.as_deref(), out)?;
        loose_marshal_array(wf, self.broker_path.as_deref(), out)?;
        out.write_bool(self.broker_master_connector);
        out.write_bool(self.manageable);
        Ok(())
    }

    fn loose_unmarshal(&mut self, wf: &mut OpenWireFormat, input: &mut DataInput<'_>) -> Result<()> {
        loose_unmarshal_base(&mut self.base, input)?;
        self.connection_id = expect_kind(loose_unmarshal_cached(wf, input)?, CONNECTION_ID)?;
        self.client_id = loose_unmarshal_string(input)?;
        self.password = loose_unmarshal_string(input)?;
        self.user_name = loose_unmarshal_string(input)?;
        self.broker_path = loose_unmarshal_array(wf, input)?;
        self.broker_master_connector = input.read_bool()?;
        self.manageable = input.read_bool()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SessionInfo
//
// base, session_id (cached)
// ---------------------------------------------------------------------------

impl Marshal for SessionInfo {
    fn tight_marshal1(&self, wf: &mut OpenWireFormat, bs: &mut BooleanStream) -> Result<usize> {
        let rc = tight_marshal_base1(&self.base, bs)?;
        Ok(rc + tight_marshal_cached1(wf, SESSION_ID, self.session_id.as_ref(), bs)?)
    }

    fn tight_marshal2(
        &self,
        wf: &mut OpenWireFormat,
        out: &mut DataOutput,
        bs: &mut BooleanStream,
    ) -> Result<()> {
        tight_marshal_base2(&self.base, out, bs)?;
        tight_marshal_cached2(wf, self.session_id.as_ref(), out, bs)
    }

    fn tight_unmarshal(
        &mut self,
        wf: &mut OpenWireFormat,
        input: &mut DataInput<'_>,
        bs: &mut BooleanStream,
    ) -> Result<()> {
        tight_unmarshal_base(&mut self.base, input, bs)?;
        self.session_id = expect_kind(tight_unmarshal_cached(wf, input, bs)?, SESSION_ID)?;
        Ok(())
    }

    fn loose_marshal(&self, wf: &mut OpenWireFormat, out: &mut DataOutput) -> Result<()> {
        loose_marshal_base(&self.base, out);
        loose_marshal_cached(wf, SESSION_ID, self.session_id.as_ref(), out)
    }

    fn loose_unmarshal(&mut self, wf: &mut OpenWireFormat, input: &mut DataInput<'_>) -> Result<()> {
        loose_unmarshal_base(&mut self.base, input)?;
        self.session_id = expect_kind(loose_unmarshal_cached(wf, input)?, SESSION_ID)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ProducerInfo
//
// base, producer_id (cached), destination (cached), broker_path (BrokerId[])
// ---------------------------------------------------------------------------

impl Marshal for ProducerInfo {
    fn tight_marshal1(&self, wf: &mut OpenWireFormat, bs: &mut BooleanStream) -> Result<usize> {
        let mut rc = tight_marshal_base1(&self.base, bs)?;
        rc += tight_marshal_cached1(wf, PRODUCER_ID, self.producer_id.as_ref(), bs)?;
        rc += tight_marshal_cached1(wf, DESTINATION, self.destination.as_ref(), bs)?;
        rc += tight_marshal_array1(wf, self.broker_path.as_deref(), bs)?;
        Ok(rc)
    }

    fn tight_marshal2(
        &self,
        wf: &mut OpenWireFormat,
        out: &mut DataOutput,
        bs: &mut BooleanStream,
    ) -> Result<()> {
        tight_marshal_base2(&self.base, out, bs)?;
        tight_marshal_cached2(wf, self.producer_id.as_ref(), out, bs)?;
        tight_marshal_cached2(wf, self.destination.as_ref(), out, bs)?;
        tight_marshal_array2(wf, self.broker_path.as_deref(), out, bs)
    }

    fn tight_unmarshal(
        &mut self,
        wf: &mut OpenWireFormat,
        input: &mut DataInput<'_>,
        bs: &mut BooleanStream,
    ) -> Result<()> {
        tight_unmarshal_base(&mut self.base, input, bs)?;
        self.producer_id = expect_kind(tight_unmarshal_cached(wf, input, bs)?, PRODUCER_ID)?;
        self.destination = expect_kind(tight_unmarshal_cached(wf, input, bs)?, DESTINATION)?;
        self.broker_path = tight_unmarshal_array(wf, input, bs)?;
        Ok(())
    }

    fn loose_marshal(&self, wf: &mut OpenWireFormat, out: &mut DataOutput) -> Result<()> {
        loose_marshal_base(&self.base, out);
        loose_marshal_cached(wf, PRODUCER_ID, self.producer_id.as_ref(), out)?;
        loose_marshal_cached(wf, DESTINATION, self.destination.as_ref(), out)?;
        loose_marshal_array(wf, self.broker_path.as_deref(), out)
    }

    fn loose_unmarshal(&mut self, wf: &mut OpenWireFormat, input: &mut DataInput<'_>) -> Result<()> {
        loose_unmarshal_base(&mut self.base, input)?;
        self.producer_id = expect_kind(loose_unmarshal_cached(wf, input)?, PRODUCER_ID)?;
        self.destination = expect_kind(loose_unmarshal_cached(wf, input)?, DESTINATION)?;
        self.broker_path = loose_unmarshal_array(wf, input)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RemoveInfo
//
// base, object_id (cached)
// ---------------------------------------------------------------------------

impl Marshal for RemoveInfo {
    fn tight_marshal1(&self, wf: &mut OpenWireFormat, bs: &mut BooleanStream) -> Result<usize> {
        let rc = tight_marshal_base1(&self.base, bs)?;
        Ok(rc + tight_marshal_cached1(wf, OBJECT_ID, self.object_id.as_ref(), bs)?)
    }

    fn tight_marshal2(
        &self,
        wf: &mut OpenWireFormat,
        out: &mut DataOutput,
        bs: &mut BooleanStream,
    ) -> Result<()> {
        tight_marshal_base2(&self.base, out, bs)?;
        tight_marshal_cached2(wf, self.object_id.as_ref(), out, bs)
    }

    fn tight_unmarshal(
        &mut self,
        wf: &mut OpenWireFormat,
        input: &mut DataInput<'_>,
        bs: &mut BooleanStream,
    ) -> Result<()> {
        tight_unmarshal_base(&mut self.base, input, bs)?;
        self.object_id = expect_kind(tight_unmarshal_cached(wf, input, bs)?, OBJECT_ID)?;
        Ok(())
    }

    fn loose_marshal(&self, wf: &mut OpenWireFormat, out: &mut DataOutput) -> Result<()> {
        loose_marshal_base(&self.base, out);
        loose_marshal_cached(wf, OBJECT_ID, self.object_id.as_ref(), out)
    }

    fn loose_unmarshal(&mut self, wf: &mut OpenWireFormat, input: &mut DataInput<'_>) -> Result<()> {
        loose_unmarshal_base(&mut self.base, input)?;
        self.object_id = expect_kind(loose_unmarshal_cached(wf, input)?, OBJECT_ID)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ConnectionError
//
// base, exception (throwable), connection_id (nested ConnectionId)
// ---------------------------------------------------------------------------

impl Marshal for ConnectionError {
    fn tight_marshal1(&self, wf: &mut OpenWireFormat, bs: &mut BooleanStream) -> Result<usize> {
        let mut rc = tight_marshal_base1(&self.base, bs)?;
        rc += tight_marshal_throwable1(wf, self.exception.as_ref(), bs)?;
        rc += tight_marshal_typed1(wf, self.connection_id.as_ref(), bs)?;
        Ok(rc)
    }

    fn tight_marshal2(
        &self,
        wf: &mut OpenWireFormat,
        out: &mut DataOutput,
        bs: &mut BooleanStream,
    ) -> Result<()> {
        tight_marshal_base2(&self.base, out, bs)?;
        tight_marshal_throwable2(wf, self.exception.as_ref(), out, bs)?;
        tight_marshal_typed2(wf, self.connection_id.as_ref(), out, bs)
    }

    fn tight_unmarshal(
        &mut self,
        wf: &mut OpenWireFormat,
        input: &mut DataInput<'_>,
        bs: &mut BooleanStream,
    ) -> Result<()> {
        tight_unmarshal_base(&mut self.base, input, bs)?;
        self.exception = tight_unmarshal_throwable(wf, input, bs)?;
        self.connection_id = tight_unmarshal_typed(wf, input, bs)?;
        Ok(())
    }

    fn loose_marshal(&self, wf: &mut OpenWireFormat, out: &mut DataOutput) -> Result<()> {
        loose_marshal_base(&self.base, out);
        loose_marshal_throwable(wf, self.exception.as_ref(), out)?;
        loose_marshal_typed(wf, self.connection_id.as_ref(), out)
    }

    fn loose_unmarshal(&mut self, wf: &mut OpenWireFormat, input: &mut DataInput<'_>) -> Result<()> {
        loose_unmarshal_base(&mut self.base, input)?;
        self.exception = loose_unmarshal_throwable(wf, input)?;
        self.connection_id = loose_unmarshal_typed(wf, input)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Response: base, correlation_id (4)
// ExceptionResponse: base, correlation_id (4), exception (throwable)
// ---------------------------------------------------------------------------

impl Marshal for Response {
    fn tight_marshal1(&self, _wf: &mut OpenWireFormat, bs: &mut BooleanStream) -> Result<usize> {
        Ok(tight_marshal_base1(&self.base, bs)? + 4)
    }

    fn tight_marshal2(
        &self,
        _wf: &mut OpenWireFormat,
        out: &mut DataOutput,
        bs: &mut BooleanStream,
    ) -> Result<()> {
        tight_marshal_base2(&self.base, out, bs)?;
        out.write_i32(self.correlation_id);
        Ok(())
    }

    fn tight_unmarshal(
        &mut self,
        _wf: &mut OpenWireFormat,
        input: &mut DataInput<'_>,
        bs: &mut BooleanStream,
    ) -> Result<()> {
        tight_unmarshal_base(&mut self.base, input, bs)?;
        self.correlation_id = input.read_i32()?;
        Ok(())
    }

    fn loose_marshal(&self, _wf: &mut OpenWireFormat, out: &mut DataOutput) -> Result<()> {
        loose_marshal_base(&self.base, out);
        out.write_i32(self.correlation_id);
        Ok(())
    }

    fn loose_unmarshal(&mut self, _wf: &mut OpenWireFormat, input: &mut DataInput<'_>) -> Result<()> {
        loose_unmarshal_base(&mut self.base, input)?;
        self.correlation_id = input.read_i32()?;
        Ok(())
    }
}

impl Marshal for ExceptionResponse {
    fn tight_marshal1(&self, wf: &mut OpenWireFormat, bs: &mut BooleanStream) -> Result<usize> {
        let rc = tight_marshal_base1(&self.base, bs)? + 4;
        Ok(rc + tight_marshal_throwable1(wf, self.exception.as_ref(), bs)?)
    }

    fn tight_marshal2(
        &self,
        wf: &mut OpenWireFormat,
        out: &mut DataOutput,
        bs: &mut BooleanStream,
    ) -> Result<()> {
        tight_marshal_base2(&self.base, out, bs)?;
        out.write_i32(self.correlation_id);
        tight_marshal_throwable2(wf, self.exception.as_ref(), out, bs)
    }

    fn tight_unmarshal(
        &mut self,
        wf: &mut OpenWireFormat,
        input: &mut DataInput<'_>,
        bs: &mut BooleanStream,
    ) -> Result<()> {
        tight_unmarshal_base(&mut self.base, input, bs)?;
        self.correlation_id = input.read_i32()?;
        self.exception = tight_unmarshal_throwable(wf, input, bs)?;
        Ok(())
    }

    fn loose_marshal(&self, wf: &mut OpenWireFormat, out: &mut DataOutput) -> Result<()> {
        loose_marshal_base(&self.base, out);
        out.write_i32(self.correlation_id);
        loose_marshal_throwable(wf, self.exception.as_ref(), out)
    }

    fn loose_unmarshal(&mut self, wf: &mut OpenWireFormat, input: &mut DataInput<'_>) -> Result<()> {
        loose_unmarshal_base(&mut self.base, input)?;
        self.correlation_id = input.read_i32()?;
        self.exception = loose_unmarshal_throwable(wf, input)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Header-only commands: base
// ---------------------------------------------------------------------------

macro_rules! header_only_command {
    ($($ty:ident),*) => {$(
        impl Marshal for $ty {
            fn tight_marshal1(&self, _wf: &mut OpenWireFormat, bs: &mut BooleanStream) -> Result<usize> {
                tight_marshal_base1(&self.base, bs)
            }

            fn tight_marshal2(
                &self,
                _wf: &mut OpenWireFormat,
                out: &mut DataOutput,
                bs: &mut BooleanStream,
            ) -> Result<()> {
                tight_marshal_base2(&self.base, out, bs)
            }

            fn tight_unmarshal(
                &mut self,
                _wf: &mut OpenWireFormat,
                input: &mut DataInput<'_>,
                bs: &mut BooleanStream,
            ) -> Result<()> {
                tight_unmarshal_base(&mut self.base, input, bs)
            }

            fn loose_marshal(&self, _wf: &mut OpenWireFormat, out: &mut DataOutput) -> Result<()> {
                loose_marshal_base(&self.base, out);
                Ok(())
            }

            fn loose_unmarshal(&mut self, _wf: &mut OpenWireFormat, input: &mut DataInput<'_>) -> Result<()> {
                loose_unmarshal_base(&mut self.base, input)
            }
        }
    )*};
}

header_only_command!(KeepAliveInfo, ShutdownInfo);

// ---------------------------------------------------------------------------
// Destinations: physical_name
// ---------------------------------------------------------------------------

macro_rules! destination {
    ($($ty:ident),*) => {$(
        impl Marshal for $ty {
            fn tight_marshal1(&self, _wf: &mut OpenWireFormat, bs: &mut BooleanStream) -> Result<usize> {
                tight_marshal_string1(self.physical_name.as_deref(), bs)
            }

            fn tight_marshal2(
                &self,
                _wf: &mut OpenWireFormat,
                out: &mut DataOutput,
                bs: &mut BooleanStream,
            ) -> Result<()> {
                tight_marshal_string2(self.physical_name.as_deref(), out, bs)
            }

            fn tight_unmarshal(
                &mut self,
                _wf: &mut OpenWireFormat,
                input: &mut DataInput<'_>,
                bs: &mut BooleanStream,
            ) -> Result<()> {
                self.physical_name = tight_unmarshal_string(input, bs)?;
                Ok(())
            }

            fn loose_marshal(&self, _wf: &mut OpenWireFormat, out: &mut DataOutput) -> Result<()> {
                loose_marshal_string(self.physical_name.as_deref(), out)
            }

            fn loose_unmarshal(&mut self, _wf: &mut OpenWireFormat, input: &mut DataInput<'_>) -> Result<()> {
                self.physical_name = loose_unmarshal_string(input)?;
                Ok(())
            }
        }
    )*};
}

destination!(Queue, Topic, TempQueue, TempTopic);

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

// ConnectionId: value
// BrokerId: value
macro_rules! string_id {
    ($($ty:ident),*) => {$(
        impl Marshal for $ty {
            fn tight_marshal1(&self, _wf: &mut OpenWireFormat, bs: &mut BooleanStream) -> Result<usize> {
                tight_marshal_string1(self.value.as_deref(), bs)
            }

            fn tight_marshal2(
                &self,
                _wf: &mut OpenWireFormat,
                out: &mut DataOutput,
                bs: &mut BooleanStream,
            ) -> Result<()> {
                tight_marshal_string2(self.value.as_deref(), out, bs)
            }

            fn tight_unmarshal(
                &mut self,
                _wf: &mut OpenWireFormat,
                input: &mut DataInput<'_>,
                bs: &mut BooleanStream,
            ) -> Result<()> {
                self.value = tight_unmarshal_string(input, bs)?;
                Ok(())
            }

            fn loose_marshal(&self, _wf: &mut OpenWireFormat, out: &mut DataOutput) -> Result<()> {
                loose_marshal_string(self.value.as_deref(), out)
            }

            fn loose_unmarshal(&mut self, _wf: &mut OpenWireFormat, input: &mut DataInput<'_>) -> Result<()> {
                self.value = loose_unmarshal_string(input)?;
                Ok(())
            }
        }
    )*};
}

string_id!(ConnectionId, BrokerId);

// SessionId: connection_id, value (long)
impl Marshal for SessionId {
    fn tight_marshal1(&self, _wf: &mut OpenWireFormat, bs: &mut BooleanStream) -> Result<usize> {
        let rc = tight_marshal_string1(self.connection_id.as_deref(), bs)?;
        Ok(rc + tight_marshal_long1(self.value, bs)?)
    }

    fn tight_marshal2(
        &self,
        _wf: &mut OpenWireFormat,
        out: &mut DataOutput,
        bs: &mut BooleanStream,
    ) -> Result<()> {
        tight_marshal_string2(self.connection_id.as_deref(), out, bs)?;
        tight_marshal_long2(self.value, out, bs)
    }

    fn tight_unmarshal(
        &mut self,
        _wf: &mut OpenWireFormat,
        input: &mut DataInput<'_>,
        bs: &mut BooleanStream,
    ) -> Result<()> {
        self.connection_id = tight_unmarshal_string(input, bs)?;
        self.value = tight_unmarshal_long(input, bs)?;
        Ok(())
    }

    fn loose_marshal(&self, _wf: &mut OpenWireFormat, out: &mut DataOutput) -> Result<()> {
        loose_marshal_string(self.connection_id.as_deref(), out)?;
        out.write_i64(self.value);
        Ok(())
    }

    fn loose_unmarshal(&mut self, _wf: &mut OpenWireFormat, input: &mut DataInput<'_>) -> Result<()> {
        self.connection_id = loose_unmarshal_string(input)?;
        self.value = input.read_i64()?;
        Ok(())
    }
}

// ConsumerId: connection_id, session_id (long), value (long)
impl Marshal for ConsumerId {
    fn tight_marshal1(&self, _wf: &mut OpenWireFormat, bs: &mut BooleanStream) -> Result<usize> {
        let mut rc = tight_marshal_string1(self.connection_id.as_deref(), bs)?;
        rc += tight_marshal_long1(self.session_id, bs)?;
        rc += tight_marshal_long1(self.value, bs)?;
        Ok(rc)
    }

    fn tight_marshal2(
        &self,
        _wf: &mut OpenWireFormat,
        out: &mut DataOutput,
        bs: &mut BooleanStream,
    ) -> Result<()> {
        tight_marshal_string2(self.connection_id.as_deref(), out, bs)?;
        tight_marshal_long2(self.session_id, out, bs)?;
        tight_marshal_long2(self.value, out, bs)
    }

    fn tight_unmarshal(
        &mut self,
        _wf: &mut OpenWireFormat,
        input: &mut DataInput<'_>,
        bs: &mut BooleanStream,
    ) -> Result<()> {
        self.connection_id = tight_unmarshal_string(input, bs)?;
        self.session_id = tight_unmarshal_long(input, bs)?;
        self.value = tight_unmarshal_long(input, bs)?;
        Ok(())
    }

    fn loose_marshal(&self, _wf: &mut OpenWireFormat, out: &mut DataOutput) -> Result<()> {
        loose_marshal_string(self.connection_id.as_deref(), out)?;
        out.write_i64(self.session_id);
        out.write_i64(self.value);
        Ok(())
    }

    fn loose_unmarshal(&mut self, _wf: &mut OpenWireFormat, input: &mut DataInput<'_>) -> Result<()> {
        self.connection_id = loose_unmarshal_string(input)?;
        self.session_id = input.read_i64()?;
        self.value = input.read_i64()?;
        Ok(())
    }
}

// ProducerId: connection_id, value (long), session_id (long)
impl Marshal for ProducerId {
    fn tight_marshal1(&self, _wf: &mut OpenWireFormat, bs: &mut BooleanStream) -> Result<usize> {
        let mut rc = tight_marshal_string1(self.connection_id.as_deref(), bs)?;
        rc += tight_marshal_long1(self.value, bs)?;
        rc += tight_marshal_long1(self.session_id, bs)?;
        Ok(rc)
    }

    fn tight_marshal2(
        &self,
        _wf: &mut OpenWireFormat,
        out: &mut DataOutput,
        bs: &mut BooleanStream,
    ) -> Result<()> {
        tight_marshal_string2(self.connection_id.as_deref(), out, bs)?;
        tight_marshal_long2(self.value, out, bs)?;
        tight_marshal_long2(self.session_id, out, bs)
    }

    fn tight_unmarshal(
        &mut self,
        _wf: &mut OpenWireFormat,
        input: &mut DataInput<'_>,
        bs: &mut BooleanStream,
    ) -> Result<()> {
        self.connection_id = tight_unmarshal_string(input, bs)?;
        self.value = tight_unmarshal_long(input, bs)?;
        self.session_id = tight_unmarshal_long(input, bs)?;
        Ok(())
    }

    fn loose_marshal(&self, _wf: &mut OpenWireFormat, out: &mut DataOutput) -> Result<()> {
        loose_marshal_string(self.connection_id.as_deref(), out)?;
        out.write_i64(self.value);
        out.write_i64(self.session_id);
        Ok(())
    }

    fn loose_unmarshal(&mut self, _wf: &mut OpenWireFormat, input: &mut DataInput<'_>) -> Result<()> {
        self.connection_id = loose_unmarshal_string(input)?;
        self.value = input.read_i64()?;
        self.session_id = input.read_i64()?;
        Ok(())
    }
}

// LocalTransactionId: value (long), connection_id (cached)
impl Marshal for LocalTransactionId {
    fn tight_marshal1(&self, wf: &mut OpenWireFormat, bs: &mut BooleanStream) -> Result<usize> {
        let rc = tight_marshal_long1(self.value, bs)?;
        Ok(rc + tight_marshal_cached1(wf, CONNECTION_ID, self.connection_id.as_ref(), bs)?)
    }

    fn tight_marshal2(
        &self,
        wf: &mut OpenWireFormat,
        out: &mut DataOutput,
        bs: &mut BooleanStream,
    ) -> Result<()> {
        tight_marshal_long2(self.value, out, bs)?;
        tight_marshal_cached2(wf, self.connection_id.as_ref(), out, bs)
    }

    fn tight_unmarshal(
        &mut self,
        wf: &mut OpenWireFormat,
        input: &mut DataInput<'_>,
        bs: &mut BooleanStream,
    ) -> Result<()> {
        self.value = tight_unmarshal_long(input, bs)?;
        self.connection_id = expect_kind(tight_unmarshal_cached(wf, input, bs)?, CONNECTION_ID)?;
        Ok(())
    }

    fn loose_marshal(&self, wf: &mut OpenWireFormat, out: &mut DataOutput) -> Result<()> {
        out.write_i64(self.value);
        loose_marshal_cached(wf, CONNECTION_ID, self.connection_id.as_ref(), out)
    }

    fn loose_unmarshal(&mut self, wf: &mut OpenWireFormat, input: &mut DataInput<'_>) -> Result<()> {
        self.value = input.read_i64()?;
        self.connection_id = expect_kind(loose_unmarshal_cached(wf, input)?, CONNECTION_ID)?;
        Ok(())
    }
}
