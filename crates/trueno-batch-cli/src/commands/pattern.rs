//! Test data generators.

use clap::ValueEnum;

/// Contents of generated buffers.
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum Pattern {
    /// All zero bytes.
    Zero,
    /// Byte `i` holds `i mod 256`.
    #[default]
    Sequential,
    /// Repeated English text.
    Text,
    /// Pseudo-random bytes (hard to compress).
    Random,
    /// Rotates through the other patterns per buffer.
    Mixed,
}

/// Generate one buffer per size.
pub fn generate_buffers(sizes: &[usize], pattern: Pattern) -> Vec<Vec<u8>> {
    let mut rng_state = 12345u64;
    sizes
        .iter()
        .enumerate()
        .map(|(i, &len)| {
            let pattern = match pattern {
                Pattern::Mixed => [Pattern::Zero, Pattern::Random, Pattern::Sequential, Pattern::Text][i % 4],
                other => other,
            };
            fill(len, pattern, &mut rng_state)
        })
        .collect()
}

fn fill(len: usize, pattern: Pattern, rng_state: &mut u64) -> Vec<u8> {
    match pattern {
        Pattern::Zero => vec![0; len],
        Pattern::Sequential | Pattern::Mixed => (0..len).map(|i| i as u8).collect(),
        Pattern::Text => {
            let text = b"The quick brown fox jumps over the lazy dog. ";
            (0..len).map(|i| text[i % text.len()]).collect()
        }
        Pattern::Random => (0..len)
            .map(|_| {
                *rng_state = rng_state.wrapping_mul(6364136223846793005).wrapping_add(1);
                (*rng_state >> 33) as u8
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_pattern() {
        let buffers = generate_buffers(&[300], Pattern::Sequential);
        assert_eq!(buffers[0][255], 255);
        assert_eq!(buffers[0][256], 0);
    }

    #[test]
    fn test_mixed_rotates() {
        let buffers = generate_buffers(&[64, 64, 64, 64], Pattern::Mixed);
        assert!(buffers[0].iter().all(|&b| b == 0));
        assert_eq!(buffers[2][5], 5);
        assert_eq!(&buffers[3][..3], b"The");
    }

    #[test]
    fn test_random_is_deterministic() {
        assert_eq!(
            generate_buffers(&[1000], Pattern::Random),
            generate_buffers(&[1000], Pattern::Random)
        );
    }

    #[test]
    fn test_sizes_respected() {
        let buffers = generate_buffers(&[0, 1, 4097], Pattern::Text);
        let lens: Vec<usize> = buffers.iter().map(Vec::len).collect();
        assert_eq!(lens, vec![0, 1, 4097]);
    }
}
