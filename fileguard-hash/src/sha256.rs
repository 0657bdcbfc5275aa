use {
    crate::{HashAlgorithm, to_hex},
    sha2::Digest,
    std::io::{self, Read},
};

/// The production hash algorithm: SHA-256.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Sha256;

impl HashAlgorithm for Sha256
{
    fn name(&self) -> &'static str
    {
        "sha256"
    }

    fn sum(&self, reader: &mut dyn Read) -> io::Result<String>
    {
        let mut hasher = sha2::Sha256::new();
        let mut buf = [0u8; 8192];

        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        Ok(to_hex(&hasher.finalize()))
    }
}
