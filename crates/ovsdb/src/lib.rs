mod error;
pub mod schema;
mod update;
mod value;

pub use error::Error;
pub use schema::{
    BaseType, ColumnSchema, ColumnType, DatabaseSchema, RefType, TableSchema, UNLIMITED,
};
pub use update::{RowUpdate, TableUpdate, TableUpdates};
pub use value::{Atom, Datum, Row};

pub type Result<T> = std::result::Result<T, Error>;
