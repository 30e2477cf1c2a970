pub mod hex_addr;
