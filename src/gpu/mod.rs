pub mod bloom_processor;
