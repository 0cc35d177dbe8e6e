/// Ordered, append-only list of (tag, value) pairs serialized with
/// big-endian tags and BER-TLV length encoding.
#[derive(Debug, Clone, Default)]
pub struct TlvPackage {
    entries: Vec<(u32, Vec<u8>)>,
}

impl TlvPackage {
    pub fn new() -> TlvPackage {
        TlvPackage {
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, tag: u32, value: &[u8]) {
        self.entries.push((tag, value.to_vec()));
    }

    pub fn entries(&self) -> &[(u32, Vec<u8>)] {
        &self.entries
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut output: Vec<u8> = Vec::new();

        for (tag, value) in &self.entries {
            let tag_bytes = tag.to_be_bytes();
            let skip = tag_bytes.iter().take_while(|&&b| b == 0).count().min(3);
            output.extend_from_slice(&tag_bytes[skip..]);

            if value.len() <= 0x7F {
                output.push(value.len() as u8);
            } else {
                let len_bytes = value.len().to_be_bytes();
                let skip = len_bytes.iter().take_while(|&&b| b == 0).count();
                output.push(0x80 | (len_bytes.len() - skip) as u8);
                output.extend_from_slice(&len_bytes[skip..]);
            }

            output.extend_from_slice(value);
        }

        output
    }
}
