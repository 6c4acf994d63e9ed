//! Tagged keyspace value (string/list/set) plus the process-wide shared
//! reply fragments.
//!
//! Values are reference-counted via `Rc` rather than the pointer-and-manual-
//! refcount scheme of the original: `Rc::clone` already gives O(1) clone
//! and drop, so there is nothing left for a free-object list to buy except
//! allocator-churn reduction, which is not worth the complexity here (see
//! DESIGN.md's note on Open Question 1/"free-object list").

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use crate::list::List;

/// A raw, binary-safe byte string -- the one primitive every Value variant
/// is ultimately built from (strings directly, list/set elements as well).
pub type Bytes = Rc<Vec<u8>>;

pub fn bytes_from(slice: &[u8]) -> Bytes {
    Rc::new(slice.to_vec())
}

pub enum Value {
    Str(Bytes),
    List(RefCell<List<Bytes>>),
    Set(RefCell<HashSet<Bytes>>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Set(_) => "set",
        }
    }

    pub fn type_code(&self) -> u8 {
        match self {
            Value::Str(_) => 0,
            Value::List(_) => 1,
            Value::Set(_) => 2,
        }
    }

    pub fn as_str(&self) -> Option<&Bytes> {
        match self {
            Value::Str(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&RefCell<List<Bytes>>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&RefCell<HashSet<Bytes>>> {
        match self {
            Value::Set(s) => Some(s),
            _ => None,
        }
    }
}

/// Shared, immortal reply fragments -- `&'static` constants rather than
/// refcounted objects, per the design note that a reply queue of owned vs.
/// shared entries should not rely on refcount arithmetic never reaching 0.
pub const CRLF: &[u8] = b"\r\n";
pub const OK: &[u8] = b"+OK\r\n";
pub const ERR_GENERIC: &[u8] = b"-ERR\r\n";
pub const C_ZERO: &[u8] = b"0\r\n";
pub const C_ONE: &[u8] = b"1\r\n";
pub const NIL: &[u8] = b"nil\r\n";
pub const PONG: &[u8] = b"+PONG\r\n";
pub const EMPTY_BULK: &[u8] = b"0\r\n\r\n";
pub const NEG_ONE: &[u8] = b"-1\r\n";

pub const WRONG_TYPE_ERR: &[u8] = b"-ERR Operation against a key holding the wrong kind of value\r\n";
pub const NO_KEY_ERR: &[u8] = b"-ERR no such key\r\n";
pub const SYNTAX_ERR: &[u8] = b"-ERR syntax error\r\n";
pub const SAME_OBJECT_ERR: &[u8] = b"-ERR source and destination objects are the same\r\n";
pub const OUT_OF_RANGE_ERR: &[u8] = b"-ERR index out of range\r\n";
pub const WRONG_ARGS_ERR: &[u8] = b"-ERR wrong number of arguments\r\n";
