//! Table payload codecs.
//!
//! Realization tables arrive in whatever format the producing workflow wrote them in.
//! [`DecoderChain`] probes an ordered list of [`TableDecoder`]s (Parquet, Arrow IPC file,
//! Arrow IPC stream, CSV) and returns the first full success. Derived artifacts are
//! always written with [`encode_ipc_file`], whose output is a pure function of the table.

pub mod csv;
pub mod decode;
pub mod encode;

pub use csv::CsvDecoder;
pub use decode::{
    Decoded, DecoderChain, IpcFileDecoder, IpcStreamDecoder, ParquetDecoder, TableDecoder,
    describe_failures,
};
pub use encode::{encode_csv, encode_ipc_file, write_parquet_to_memory};
