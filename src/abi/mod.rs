use ethers::{
    abi::{self, param_type::Reader, ParamType, Token},
    types::{Bytes, I256},
    utils::id,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::SnapshotError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mutability {
    Pure,
    View,
    NonPayable,
    Payable,
}

impl Mutability {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pure" => Some(Mutability::Pure),
            "view" => Some(Mutability::View),
            "nonpayable" => Some(Mutability::NonPayable),
            "payable" => Some(Mutability::Payable),
            _ => None,
        }
    }
}

/// One callable function of a contract, with canonical Solidity type strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    pub name: String,
    pub mutability: Mutability,
    pub input_types: Vec<String>,
    pub output_types: Vec<String>,
}

impl FunctionDescriptor {
    pub fn new(name: &str, mutability: Mutability, inputs: &[&str], outputs: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            mutability,
            input_types: inputs.iter().map(|s| s.to_string()).collect(),
            output_types: outputs.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Zero-argument view function returning the given types.
    pub fn view(name: &str, outputs: &[&str]) -> Self {
        Self::new(name, Mutability::View, &[], outputs)
    }

    /// Eligible for automatic state reading: no inputs and cannot modify state.
    pub fn is_state_readable(&self) -> bool {
        self.input_types.is_empty()
            && matches!(self.mutability, Mutability::View | Mutability::Pure)
    }

    pub fn signature(&self) -> String {
        format!("{}({})", self.name, self.input_types.join(","))
    }

    pub fn selector(&self) -> [u8; 4] {
        id(self.signature())
    }

    pub fn input_params(&self) -> Result<Vec<ParamType>, SnapshotError> {
        parse_types(&self.input_types)
    }

    pub fn output_params(&self) -> Result<Vec<ParamType>, SnapshotError> {
        parse_types(&self.output_types)
    }

    /// Selector followed by the ABI-encoded arguments.
    pub fn encode_call(&self, args: &[Token]) -> Result<Bytes, SnapshotError> {
        let params = self.input_params()?;
        if !Token::types_check(args, &params) {
            return Err(SnapshotError::Validation(format!(
                "arguments do not match {}",
                self.signature()
            )));
        }

        let mut data = self.selector().to_vec();
        data.extend(abi::encode(args));
        Ok(data.into())
    }

    pub fn decode_output(&self, data: &[u8]) -> Result<Vec<Token>, SnapshotError> {
        let params = self.output_params()?;
        if data.is_empty() && !params.is_empty() {
            return Err(SnapshotError::CallFailed(format!(
                "{} returned no data",
                self.signature()
            )));
        }
        abi::decode(&params, data).map_err(|e| {
            SnapshotError::CallFailed(format!("failed to decode {}: {}", self.signature(), e))
        })
    }

    /// Decoded return value as JSON: the bare value for one output, an array otherwise.
    pub fn decode_result(&self, data: &[u8]) -> Result<Value, SnapshotError> {
        let mut tokens = self.decode_output(data)?;
        if tokens.len() == 1 {
            return Ok(token_to_json(&tokens.remove(0)));
        }
        Ok(Value::Array(tokens.iter().map(token_to_json).collect()))
    }
}

fn parse_types(types: &[String]) -> Result<Vec<ParamType>, SnapshotError> {
    types
        .iter()
        .map(|t| {
            Reader::read(t)
                .map_err(|e| SnapshotError::Validation(format!("unsupported abi type {}: {}", t, e)))
        })
        .collect()
}

/// ABI supplied by a caller: raw JSON text, an already-decoded JSON value or parsed descriptors.
#[derive(Debug, Clone)]
pub enum AbiInput {
    Json(String),
    Value(Value),
    Parsed(Vec<FunctionDescriptor>),
}

impl AbiInput {
    pub fn descriptors(&self) -> Result<Vec<FunctionDescriptor>, SnapshotError> {
        match self {
            AbiInput::Json(text) => parse_abi_json(text),
            AbiInput::Value(value) => parse_abi_value(value),
            AbiInput::Parsed(descriptors) => Ok(descriptors.clone()),
        }
    }
}

pub fn parse_abi_json(text: &str) -> Result<Vec<FunctionDescriptor>, SnapshotError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| SnapshotError::Validation(format!("malformed abi json: {}", e)))?;
    parse_abi_value(&value)
}

/// Collects function entries from an ABI array. Entries that cannot be read are skipped.
pub fn parse_abi_value(value: &Value) -> Result<Vec<FunctionDescriptor>, SnapshotError> {
    let entries = match value {
        Value::Array(entries) => entries,
        Value::Object(map) => match map.get("abi") {
            Some(Value::Array(entries)) => entries,
            Some(Value::String(text)) => return parse_abi_json(text),
            _ => return Err(SnapshotError::Validation("abi object has no entries".to_string())),
        },
        _ => return Err(SnapshotError::Validation("abi must be a json array".to_string())),
    };

    Ok(entries.iter().filter_map(parse_entry).collect())
}

fn parse_entry(entry: &Value) -> Option<FunctionDescriptor> {
    let kind = entry.get("type").and_then(Value::as_str).unwrap_or("function");
    if kind != "function" {
        return None;
    }
    let name = entry.get("name").and_then(Value::as_str)?;

    let mutability = entry
        .get("stateMutability")
        .and_then(Value::as_str)
        .and_then(Mutability::parse)
        .unwrap_or_else(|| {
            // pre-0.5 compiler output
            if entry.get("constant").and_then(Value::as_bool).unwrap_or(false) {
                Mutability::View
            } else if entry.get("payable").and_then(Value::as_bool).unwrap_or(false) {
                Mutability::Payable
            } else {
                Mutability::NonPayable
            }
        });

    Some(FunctionDescriptor {
        name: name.to_string(),
        mutability,
        input_types: param_list(entry.get("inputs"))?,
        output_types: param_list(entry.get("outputs"))?,
    })
}

fn param_list(params: Option<&Value>) -> Option<Vec<String>> {
    match params {
        None | Some(Value::Null) => Some(Vec::new()),
        Some(Value::Array(items)) => items.iter().map(canonical_type).collect(),
        _ => None,
    }
}

fn canonical_type(param: &Value) -> Option<String> {
    let raw = param.get("type").and_then(Value::as_str)?;
    match raw.strip_prefix("tuple") {
        Some(suffix) => {
            let components = param_list(param.get("components"))?;
            Some(format!("({}){}", components.join(","), suffix))
        }
        None => Some(raw.to_string()),
    }
}

/// JSON rendering of a decoded value. Integers are decimal strings, addresses and bytes are lowercase hex.
pub fn token_to_json(token: &Token) -> Value {
    match token {
        Token::Address(a) => json!(format!("{:?}", a)),
        Token::Uint(u) => json!(u.to_string()),
        Token::Int(i) => json!(I256::from_raw(*i).to_string()),
        Token::Bool(b) => json!(b),
        Token::String(s) => json!(s),
        Token::Bytes(b) | Token::FixedBytes(b) => json!(format!("0x{}", hex::encode(b))),
        Token::Array(items) | Token::FixedArray(items) | Token::Tuple(items) => {
            Value::Array(items.iter().map(token_to_json).collect())
        }
    }
}

/// Zero-argument functions probed on every contract, ABI or not.
pub fn common_probes() -> Vec<FunctionDescriptor> {
    vec![
        FunctionDescriptor::view("name", &["string"]),
        FunctionDescriptor::view("symbol", &["string"]),
        FunctionDescriptor::view("decimals", &["uint8"]),
        FunctionDescriptor::view("totalSupply", &["uint256"]),
        FunctionDescriptor::view("owner", &["address"]),
        FunctionDescriptor::view("admin", &["address"]),
        FunctionDescriptor::view("paused", &["bool"]),
        FunctionDescriptor::view("version", &["string"]),
    ]
}

pub fn erc20_balance_of() -> FunctionDescriptor {
    FunctionDescriptor::new("balanceOf", Mutability::View, &["address"], &["uint256"])
}

pub fn feed_decimals() -> FunctionDescriptor {
    FunctionDescriptor::view("decimals", &["uint8"])
}

pub fn feed_latest_round_data() -> FunctionDescriptor {
    FunctionDescriptor::view(
        "latestRoundData",
        &["uint80", "int256", "uint256", "uint256", "uint80"],
    )
}

pub fn router_get_amounts_out() -> FunctionDescriptor {
    FunctionDescriptor::new(
        "getAmountsOut",
        Mutability::View,
        &["uint256", "address[]"],
        &["uint256[]"],
    )
}

pub fn factory_get_pair() -> FunctionDescriptor {
    FunctionDescriptor::new("getPair", Mutability::View, &["address", "address"], &["address"])
}

pub fn pair_token0() -> FunctionDescriptor {
    FunctionDescriptor::view("token0", &["address"])
}

pub fn pair_get_reserves() -> FunctionDescriptor {
    FunctionDescriptor::view("getReserves", &["uint112", "uint112", "uint32"])
}
