use thiserror::Error;

use crate::{DataType, ScalarValue};

#[derive(Error, Debug)]
#[error("Invalid actor ID: {0}")]
pub struct InvalidActorId(pub String);

#[derive(Error, Debug, PartialEq)]
#[error("Invalid change hash slice: {0:?}")]
pub struct InvalidChangeHashSlice(pub Vec<u8>);

#[derive(Error, Debug, PartialEq)]
#[error("Invalid change hash: {0}")]
pub struct InvalidChangeHash(pub String);

#[derive(Error, Debug)]
#[error("Invalid op ID: {0}")]
pub struct InvalidOpId(pub String);

#[derive(Error, Debug)]
#[error("Invalid object ID: {0}")]
pub struct InvalidObjectId(pub String);

#[derive(Error, Debug)]
#[error("Invalid element ID: {0}")]
pub struct InvalidElementId(pub String);

#[derive(Error, Debug)]
#[error("{raw_value:?} is not a {datatype:?}")]
pub struct InvalidScalarValue {
    pub raw_value: ScalarValue,
    pub datatype: DataType,
    pub unexpected: String,
    pub expected: String,
}
