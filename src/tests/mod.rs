mod harness;

mod cache_tests;
mod effect_tests;
mod frame_tests;
mod query_tests;
