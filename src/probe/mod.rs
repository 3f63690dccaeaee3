pub mod packet;

pub use packet::{
    checksum, decode_reply, EchoReply, EchoRequest, Family, ICMP_HEADER_LEN, MIN_PAYLOAD_LEN,
    TIMESTAMP_LEN, TOKEN_LEN,
};
