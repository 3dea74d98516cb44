use std::str::FromStr;

use alloy_primitives::{Address, B256, U256};
use signer_types::{ChainId, TypedDataDomain};

use super::{hash_struct, AbiType, TypedDataError, TypedField, TypedValue, DOMAIN_TYPE};

/// Members of `EIP712Domain` in their canonical order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainField {
    Name,
    Version,
    ChainId,
    VerifyingContract,
    Salt,
}

impl DomainField {
    pub const ALL: [Self; 5] = [
        Self::Name,
        Self::Version,
        Self::ChainId,
        Self::VerifyingContract,
        Self::Salt,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Version => "version",
            Self::ChainId => "chainId",
            Self::VerifyingContract => "verifyingContract",
            Self::Salt => "salt",
        }
    }

    #[must_use]
    pub const fn abi_type(self) -> AbiType {
        match self {
            Self::Name | Self::Version => AbiType::String,
            Self::ChainId => AbiType::Uint256,
            Self::VerifyingContract => AbiType::Address,
            Self::Salt => AbiType::Bytes32,
        }
    }

    /// ERC-5267 bit of the member
    #[must_use]
    pub const fn bit(self) -> u8 {
        match self {
            Self::Name => 0x01,
            Self::Version => 0x02,
            Self::ChainId => 0x04,
            Self::VerifyingContract => 0x08,
            Self::Salt => 0x10,
        }
    }
}

const ALL_FIELDS_MASK: u8 = 0x1f;

/// An EIP-712 domain.
///
/// Each member is present exactly when its value is `Some`. The type table and
/// the encoded values are both derived from these options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Domain {
    pub name: Option<String>,
    pub version: Option<String>,
    pub chain_id: Option<U256>,
    pub verifying_contract: Option<Address>,
    pub salt: Option<B256>,
}

impl Domain {
    /// Present members with their values, in canonical order
    #[must_use]
    pub fn fields(&self) -> Vec<TypedField> {
        let mut fields = Vec::with_capacity(DomainField::ALL.len());
        if let Some(name) = &self.name {
            fields.push(TypedField::new(DomainField::Name.name(), TypedValue::String(name.clone())));
        }
        if let Some(version) = &self.version {
            fields.push(TypedField::new(
                DomainField::Version.name(),
                TypedValue::String(version.clone()),
            ));
        }
        if let Some(chain_id) = self.chain_id {
            fields.push(TypedField::new(DomainField::ChainId.name(), TypedValue::Uint256(chain_id)));
        }
        if let Some(verifying_contract) = self.verifying_contract {
            fields.push(TypedField::new(
                DomainField::VerifyingContract.name(),
                TypedValue::Address(verifying_contract),
            ));
        }
        if let Some(salt) = self.salt {
            fields.push(TypedField::new(DomainField::Salt.name(), TypedValue::Bytes32(salt)));
        }
        fields
    }

    /// `EIP712Domain` type table, e.g. `[("name", string), ("chainId", uint256)]`
    #[must_use]
    pub fn type_table(&self) -> Vec<(String, AbiType)> {
        self.fields()
            .into_iter()
            .map(|field| {
                let abi_type = field.value.abi_type();
                (field.name, abi_type)
            })
            .collect()
    }

    /// ERC-5267 presence mask of the domain
    #[must_use]
    pub fn fields_mask(&self) -> u8 {
        let present = [
            self.name.is_some(),
            self.version.is_some(),
            self.chain_id.is_some(),
            self.verifying_contract.is_some(),
            self.salt.is_some(),
        ];

        DomainField::ALL
            .iter()
            .zip(present)
            .filter(|(_, present)| *present)
            .fold(0, |mask, (field, _)| mask | field.bit())
    }

    #[must_use]
    pub fn separator(&self) -> B256 {
        hash_struct(DOMAIN_TYPE, &self.fields())
    }
}

impl TryFrom<&TypedDataDomain> for Domain {
    type Error = TypedDataError;

    fn try_from(value: &TypedDataDomain) -> Result<Self, Self::Error> {
        if let Some(mask) = value.fields {
            if mask & !ALL_FIELDS_MASK != 0 {
                return Err(TypedDataError::InvalidFieldsMask(mask));
            }
        }

        let name = select(value.fields, DomainField::Name, non_empty(value.name.as_deref()))?
            .map(ToString::to_string);
        let version = select(value.fields, DomainField::Version, non_empty(value.version.as_deref()))?
            .map(ToString::to_string);
        let chain_id = select(value.fields, DomainField::ChainId, value.chain_id.as_ref().and_then(chain_id_value))?
            .map(parse_chain_id)
            .transpose()?;
        let verifying_contract = select(
            value.fields,
            DomainField::VerifyingContract,
            non_empty(value.verifying_contract.as_deref()),
        )?
        .map(|address| {
            Address::from_str(address)
                .map_err(|e| TypedDataError::InvalidVerifyingContract(format!("{address}: {e}")))
        })
        .transpose()?;
        let salt = select(value.fields, DomainField::Salt, non_empty(value.salt.as_deref()))?
            .map(|salt| {
                B256::from_str(salt).map_err(|e| TypedDataError::InvalidSalt(format!("{salt}: {e}")))
            })
            .transpose()?;

        Ok(Self {
            name,
            version,
            chain_id,
            verifying_contract,
            salt,
        })
    }
}

/// Applies the presence mask to a supplied value.
///
/// Without a mask a member is present when it has a value. With a mask the bit
/// decides and a flagged member must have a value.
fn select<T>(mask: Option<u8>, field: DomainField, value: Option<T>) -> Result<Option<T>, TypedDataError> {
    match mask {
        None => Ok(value),
        Some(mask) if mask & field.bit() == 0 => Ok(None),
        Some(_) => value
            .map(Some)
            .ok_or(TypedDataError::MissingDomainField(field.name())),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

enum ChainIdValue<'a> {
    Number(u64),
    Text(&'a str),
}

fn chain_id_value(value: &ChainId) -> Option<ChainIdValue<'_>> {
    match value {
        ChainId::Number(number) => Some(ChainIdValue::Number(*number)),
        ChainId::Text(text) => non_empty(Some(text.as_str())).map(ChainIdValue::Text),
    }
}

fn parse_chain_id(value: ChainIdValue<'_>) -> Result<U256, TypedDataError> {
    match value {
        ChainIdValue::Number(number) => Ok(U256::from(number)),
        ChainIdValue::Text(text) => {
            let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
                Some(hex) => U256::from_str_radix(hex, 16),
                None => U256::from_str_radix(text, 10),
            };
            parsed.map_err(|e| TypedDataError::InvalidChainId(format!("{text}: {e}")))
        }
    }
}
