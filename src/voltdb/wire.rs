//! VoltDB client wire protocol.
//!
//! Every message is a big-endian `i32` length followed by that many bytes,
//! the first of which is the protocol version. Strings are an `i32` byte
//! length (`-1` for null) followed by UTF-8. Framing is left to [`codec`];
//! the encoders here produce message bodies only.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};
use std::net::Ipv4Addr;
use tokio_util::codec::LengthDelimitedCodec;

use crate::error::DbError;
use crate::voltdb::table::{Column, ColumnType, Value, VoltTable};

pub const PROTOCOL_VERSION: u8 = 0;

const SERVICE: &str = "database";
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

const STATUS_STRING_PRESENT: u8 = 1 << 5;
const EXCEPTION_PRESENT: u8 = 1 << 6;
const APP_STATUS_STRING_PRESENT: u8 = 1 << 7;

/// A positional procedure argument.
#[derive(Clone, Debug, PartialEq)]
pub enum Param {
    Null,
    Integer(i32),
    BigInt(i64),
    String(String),
}

impl From<&str> for Param {
    fn from(s: &str) -> Self {
        Param::String(s.to_string())
    }
}

impl From<String> for Param {
    fn from(s: String) -> Self {
        Param::String(s)
    }
}

impl From<i32> for Param {
    fn from(v: i32) -> Self {
        Param::Integer(v)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseStatus {
    Success,
    UserAbort,
    GracefulFailure,
    UnexpectedFailure,
    ConnectionLost,
    ServerUnavailable,
    ConnectionTimeout,
    ResponseUnknown,
    TxnRestart,
    OperationalFailure,
    Other(i8),
}

impl ResponseStatus {
    pub fn from_code(code: i8) -> ResponseStatus {
        match code {
            1 => ResponseStatus::Success,
            -1 => ResponseStatus::UserAbort,
            -2 => ResponseStatus::GracefulFailure,
            -3 => ResponseStatus::UnexpectedFailure,
            -4 => ResponseStatus::ConnectionLost,
            -5 => ResponseStatus::ServerUnavailable,
            -6 => ResponseStatus::ConnectionTimeout,
            -7 => ResponseStatus::ResponseUnknown,
            -8 => ResponseStatus::TxnRestart,
            -9 => ResponseStatus::OperationalFailure,
            other => ResponseStatus::Other(other),
        }
    }

    #[cfg(test)]
    pub fn code(&self) -> i8 {
        match self {
            ResponseStatus::Success => 1,
            ResponseStatus::UserAbort => -1,
            ResponseStatus::GracefulFailure => -2,
            ResponseStatus::UnexpectedFailure => -3,
            ResponseStatus::ConnectionLost => -4,
            ResponseStatus::ServerUnavailable => -5,
            ResponseStatus::ConnectionTimeout => -6,
            ResponseStatus::ResponseUnknown => -7,
            ResponseStatus::TxnRestart => -8,
            ResponseStatus::OperationalFailure => -9,
            ResponseStatus::Other(code) => *code,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            ResponseStatus::ConnectionLost
                | ResponseStatus::ServerUnavailable
                | ResponseStatus::ConnectionTimeout
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClientResponse {
    pub status: ResponseStatus,
    pub status_string: Option<String>,
    pub app_status: i8,
    pub app_status_string: Option<String>,
    pub cluster_round_trip_ms: i32,
    pub results: Vec<VoltTable>,
}

impl ClientResponse {
    #[cfg(test)]
    pub fn success(results: Vec<VoltTable>) -> Self {
        ClientResponse {
            status: ResponseStatus::Success,
            status_string: None,
            app_status: i8::MIN,
            app_status_string: None,
            cluster_round_trip_ms: 0,
            results,
        }
    }

    /// The first result set, which every user procedure returns.
    pub fn first_result(&self, procedure: &str) -> Result<&VoltTable, DbError> {
        self.results
            .first()
            .ok_or_else(|| DbError::protocol(format!("{} returned no result tables", procedure)))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LoginInfo {
    pub host_id: i32,
    pub connection_id: i64,
    pub cluster_start_millis: i64,
    pub leader: Ipv4Addr,
    pub build: String,
}

/// Length-prefixed framing shared by both directions of a connection.
pub fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

pub fn encode_login(user: &str, password: &str) -> Bytes {
    let mut body = BytesMut::new();
    body.put_u8(PROTOCOL_VERSION);
    put_string(&mut body, SERVICE);
    put_string(&mut body, user);
    body.put_slice(&Sha1::digest(password.as_bytes()));
    body.freeze()
}

/// Decodes a login reply; `Err(code)` carries a non-zero authentication result.
pub fn decode_login_response(mut buf: Bytes) -> Result<Result<LoginInfo, u8>, DbError> {
    need(&buf, 2, "login response")?;
    let _version = buf.get_u8();
    let code = buf.get_u8();
    if code != 0 {
        return Ok(Err(code));
    }
    need(&buf, 24, "login response")?;
    let host_id = buf.get_i32();
    let connection_id = buf.get_i64();
    let cluster_start_millis = buf.get_i64();
    let leader = Ipv4Addr::from(buf.get_u32());
    let build = get_string(&mut buf)?.unwrap_or_default();
    Ok(Ok(LoginInfo {
        host_id,
        connection_id,
        cluster_start_millis,
        leader,
        build,
    }))
}

pub fn encode_invocation(
    procedure: &str,
    handle: i64,
    params: &[Param],
) -> Result<Bytes, DbError> {
    if params.len() > i16::MAX as usize {
        return Err(DbError::protocol(format!(
            "{} has too many parameters ({})",
            procedure,
            params.len()
        )));
    }
    let mut body = BytesMut::new();
    body.put_u8(PROTOCOL_VERSION);
    put_string(&mut body, procedure);
    body.put_i64(handle);
    body.put_i16(params.len() as i16);
    for param in params {
        match param {
            Param::Null => body.put_i8(ColumnType::Null.tag()),
            Param::Integer(v) => {
                body.put_i8(ColumnType::Integer.tag());
                body.put_i32(*v);
            }
            Param::BigInt(v) => {
                body.put_i8(ColumnType::BigInt.tag());
                body.put_i64(*v);
            }
            Param::String(s) => {
                body.put_i8(ColumnType::String.tag());
                put_string(&mut body, s);
            }
        }
    }
    Ok(body.freeze())
}

/// Decodes a procedure response into its client handle and contents.
pub fn decode_response(mut buf: Bytes) -> Result<(i64, ClientResponse), DbError> {
    need(&buf, 11, "response header")?;
    let _version = buf.get_u8();
    let handle = buf.get_i64();
    let present = buf.get_u8();
    let status = ResponseStatus::from_code(buf.get_i8());
    let status_string = if present & STATUS_STRING_PRESENT != 0 {
        get_string(&mut buf)?
    } else {
        None
    };
    need(&buf, 1, "app status")?;
    let app_status = buf.get_i8();
    let app_status_string = if present & APP_STATUS_STRING_PRESENT != 0 {
        get_string(&mut buf)?
    } else {
        None
    };
    need(&buf, 4, "round trip time")?;
    let cluster_round_trip_ms = buf.get_i32();
    if present & EXCEPTION_PRESENT != 0 {
        need(&buf, 4, "exception length")?;
        let len = get_len(&mut buf, "exception")?;
        need(&buf, len, "exception")?;
        buf.advance(len);
    }
    need(&buf, 2, "result count")?;
    let count = buf.get_i16();
    if count < 0 {
        return Err(DbError::protocol(format!("negative result count {}", count)));
    }
    let mut results = Vec::with_capacity(count as usize);
    for _ in 0..count {
        results.push(decode_table(&mut buf)?);
    }
    Ok((
        handle,
        ClientResponse {
            status,
            status_string,
            app_status,
            app_status_string,
            cluster_round_trip_ms,
            results,
        },
    ))
}

fn decode_table(buf: &mut Bytes) -> Result<VoltTable, DbError> {
    need(buf, 4, "table length")?;
    let total = get_len(buf, "table")?;
    need(buf, total, "table")?;
    let mut body = buf.split_to(total);

    need(&body, 7, "table metadata")?;
    let _metadata_len = body.get_i32();
    let status = body.get_i8();
    let column_count = body.get_i16();
    if column_count < 0 {
        return Err(DbError::protocol(format!("negative column count {}", column_count)));
    }
    let column_count = column_count as usize;
    need(&body, column_count, "column types")?;
    let mut types = Vec::with_capacity(column_count);
    for _ in 0..column_count {
        types.push(ColumnType::from_tag(body.get_i8())?);
    }
    let mut columns = Vec::with_capacity(column_count);
    for column_type in types {
        let name = get_string(&mut body)?.unwrap_or_default();
        columns.push(Column { name, column_type });
    }

    need(&body, 4, "row count")?;
    let row_count = get_len(&mut body, "row count")?;
    let mut table = VoltTable::new(columns);
    table.status = status;
    for _ in 0..row_count {
        need(&body, 4, "row length")?;
        let len = get_len(&mut body, "row")?;
        need(&body, len, "row")?;
        let mut row_buf = body.split_to(len);
        let mut row = Vec::with_capacity(column_count);
        for column in table.columns() {
            row.push(decode_value(&mut row_buf, column.column_type)?);
        }
        table.add_row(row)?;
    }
    Ok(table)
}

fn decode_value(buf: &mut Bytes, ty: ColumnType) -> Result<Value, DbError> {
    let value = match ty {
        ColumnType::Null => Value::Null,
        ColumnType::TinyInt => {
            need(buf, 1, "tinyint")?;
            match buf.get_i8() {
                i8::MIN => Value::Null,
                v => Value::TinyInt(v),
            }
        }
        ColumnType::SmallInt => {
            need(buf, 2, "smallint")?;
            match buf.get_i16() {
                i16::MIN => Value::Null,
                v => Value::SmallInt(v),
            }
        }
        ColumnType::Integer => {
            need(buf, 4, "integer")?;
            match buf.get_i32() {
                i32::MIN => Value::Null,
                v => Value::Integer(v),
            }
        }
        ColumnType::BigInt => {
            need(buf, 8, "bigint")?;
            match buf.get_i64() {
                i64::MIN => Value::Null,
                v => Value::BigInt(v),
            }
        }
        ColumnType::Timestamp => {
            need(buf, 8, "timestamp")?;
            match buf.get_i64() {
                i64::MIN => Value::Null,
                v => Value::Timestamp(v),
            }
        }
        ColumnType::Float => {
            need(buf, 8, "float")?;
            let v = buf.get_f64();
            if v <= -1.7e308 {
                Value::Null
            } else {
                Value::Float(v)
            }
        }
        ColumnType::Decimal => {
            need(buf, 16, "decimal")?;
            let mut raw = [0u8; 16];
            buf.copy_to_slice(&mut raw);
            if i128::from_be_bytes(raw) == i128::MIN {
                Value::Null
            } else {
                Value::Decimal(raw)
            }
        }
        ColumnType::String => match get_string(buf)? {
            Some(s) => Value::String(s),
            None => Value::Null,
        },
        ColumnType::Varbinary => match get_bytes(buf)? {
            Some(b) => Value::Varbinary(b.to_vec()),
            None => Value::Null,
        },
    };
    Ok(value)
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_i32(s.len() as i32);
    buf.put_slice(s.as_bytes());
}

fn need(buf: &Bytes, n: usize, what: &str) -> Result<(), DbError> {
    if buf.remaining() < n {
        return Err(DbError::protocol(format!(
            "truncated {}: need {} bytes, have {}",
            what,
            n,
            buf.remaining()
        )));
    }
    Ok(())
}

fn get_len(buf: &mut Bytes, what: &str) -> Result<usize, DbError> {
    let len = buf.get_i32();
    if len < 0 {
        return Err(DbError::protocol(format!("negative {} length {}", what, len)));
    }
    Ok(len as usize)
}

fn get_bytes(buf: &mut Bytes) -> Result<Option<Bytes>, DbError> {
    need(buf, 4, "length prefix")?;
    let len = buf.get_i32();
    if len == -1 {
        return Ok(None);
    }
    if len < 0 {
        return Err(DbError::protocol(format!("invalid length {}", len)));
    }
    need(buf, len as usize, "value")?;
    Ok(Some(buf.split_to(len as usize)))
}

fn get_string(buf: &mut Bytes) -> Result<Option<String>, DbError> {
    match get_bytes(buf)? {
        Some(b) => String::from_utf8(b.to_vec())
            .map(Some)
            .map_err(|e| DbError::protocol(format!("invalid UTF-8 string: {}", e))),
        None => Ok(None),
    }
}
