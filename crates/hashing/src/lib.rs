pub mod crc32;
