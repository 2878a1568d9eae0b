//! Type code → marshaller lookup, built once per protocol version.

use once_cell::sync::OnceCell;

use crate::error::{ProtocolError, Result};
use crate::openwire::marshal::DataStreamMarshaller;
use crate::openwire::v1;

/// Highest protocol version this codec implements
pub const MAX_SUPPORTED_VERSION: u32 = 1;

pub struct Registry {
    version: u32,
    marshallers: [Option<&'static dyn DataStreamMarshaller>; 256],
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("version", &self.version)
            .field("types", &self.type_codes().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    fn build(version: u32, marshallers: Vec<&'static dyn DataStreamMarshaller>) -> Self {
        let mut table: [Option<&'static dyn DataStreamMarshaller>; 256] = [None; 256];
        for marshaller in marshallers {
            table[marshaller.data_structure_type() as usize] = Some(marshaller);
        }
        Self {
            version,
            marshallers: table,
        }
    }

    /// Registry for a negotiated protocol version
    pub fn for_version(version: u32) -> Result<&'static Registry> {
        match version {
            1 => Ok(Self::v1()),
            other => Err(ProtocolError::UnsupportedVersion(other)),
        }
    }

    pub(crate) fn v1() -> &'static Registry {
        static V1: OnceCell<Registry> = OnceCell::new();
        V1.get_or_init(|| Registry::build(1, v1::marshallers()))
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Marshaller for a type code; unknown codes are a protocol violation
    pub fn get(&self, type_code: u8) -> Result<&'static dyn DataStreamMarshaller> {
        self.marshallers[type_code as usize].ok_or(ProtocolError::UnknownTypeCode(type_code))
    }

    pub fn contains(&self, type_code: u8) -> bool {
        self.marshallers[type_code as usize].is_some()
    }

    /// Registered type codes in ascending order
    pub fn type_codes(&self) -> impl Iterator<Item = u8> + '_ {
        (0..=u8::MAX).filter(|code| self.contains(*code))
    }
}
