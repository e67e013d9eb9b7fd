pub mod storage_writer;
