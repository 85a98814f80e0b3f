use xb_types::RequestId;

/// Hands out correlation ids: 1, 2, 3, ... Never reuses one.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: RequestId,
}

impl IdGenerator {
    pub fn next_id(&mut self) -> RequestId {
        self.last += 1;
        self.last
    }
}
