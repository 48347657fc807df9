// Generated from decode/a64.decode by build.rs.
include!(concat!(env!("OUT_DIR"), "/a64_decode.rs"));
