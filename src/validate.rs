use rand::RngCore;

use crate::probe::{EchoReply, TOKEN_LEN};

/// Marks every packet this pinger sends. The identifier is what the wire
/// header carries; the token rides in the payload and catches the case
/// where another pinger on the host ends up with the same identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    id: u16,
    token: [u8; TOKEN_LEN],
}

impl Identity {
    pub fn generate<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        let mut token = [0u8; TOKEN_LEN];
        rng.fill_bytes(&mut token);
        Self {
            id: (rng.next_u32() & 0xFFFF) as u16,
            token,
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn token(&self) -> &[u8; TOKEN_LEN] {
        &self.token
    }

    /// `effective_id` is the identifier the transport actually put on the
    /// wire, which some kernels assign themselves.
    pub fn matches(&self, reply: &EchoReply, effective_id: u16) -> bool {
        reply.id == effective_id && reply.token == self.token
    }
}
