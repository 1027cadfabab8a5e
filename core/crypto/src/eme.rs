//! EME (ECB-Mix-ECB) wide-block mode over AES-256.
//!
//! Filenames are enciphered as a single wide block so that equal prefixes do
//! not produce equal ciphertext prefixes. The construction follows Halevi and
//! Rogaway's EME with the byte order used by rclone.

use aes::cipher::{BlockDecrypt, BlockEncrypt};
use aes::{Aes256, Block};

use veilvault_common::{Error, Result};

pub const BLOCK_SIZE: usize = 16;

/// Largest input EME accepts: 128 blocks.
pub const MAX_INPUT_LEN: usize = BLOCK_SIZE * 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

type Chunk = [u8; BLOCK_SIZE];

/// Multiply by two in GF(2^128), little-endian byte order.
fn mult_by_two(input: &Chunk) -> Chunk {
    let mut out = [0u8; BLOCK_SIZE];
    out[0] = input[0].wrapping_mul(2);
    if input[15] >= 128 {
        out[0] ^= 135;
    }
    for j in 1..BLOCK_SIZE {
        out[j] = input[j].wrapping_mul(2);
        if input[j - 1] >= 128 {
            out[j] += 1;
        }
    }
    out
}

fn xor_into(target: &mut Chunk, other: &Chunk) {
    for (t, o) in target.iter_mut().zip(other.iter()) {
        *t ^= o;
    }
}

fn aes_apply(cipher: &Aes256, chunk: &mut Chunk, direction: Direction) {
    let block = Block::from_mut_slice(chunk);
    match direction {
        Direction::Encrypt => cipher.encrypt_block(block),
        Direction::Decrypt => cipher.decrypt_block(block),
    }
}

/// L_i = 2^(i+1) * AES-enc(K, 0); always computed with the forward cipher.
fn tabulate_l(cipher: &Aes256, blocks: usize) -> Vec<Chunk> {
    let mut li = [0u8; BLOCK_SIZE];
    aes_apply(cipher, &mut li, Direction::Encrypt);
    let mut table = Vec::with_capacity(blocks);
    for _ in 0..blocks {
        li = mult_by_two(&li);
        table.push(li);
    }
    table
}

/// Encipher or decipher `input` as one wide block under `tweak`.
///
/// # Errors
/// - `input` is empty, not a multiple of 16 bytes, or longer than
///   [`MAX_INPUT_LEN`]
pub fn transform(
    cipher: &Aes256,
    tweak: &[u8; BLOCK_SIZE],
    input: &[u8],
    direction: Direction,
) -> Result<Vec<u8>> {
    if input.is_empty() || input.len() % BLOCK_SIZE != 0 {
        return Err(Error::Crypto(format!(
            "EME input must be a non-empty multiple of {} bytes, got {}",
            BLOCK_SIZE,
            input.len()
        )));
    }
    if input.len() > MAX_INPUT_LEN {
        return Err(Error::Crypto(format!(
            "EME input too long: {} bytes (max {})",
            input.len(),
            MAX_INPUT_LEN
        )));
    }

    let m = input.len() / BLOCK_SIZE;
    let l_table = tabulate_l(cipher, m);

    let mut c: Vec<Chunk> = input
        .chunks_exact(BLOCK_SIZE)
        .map(|chunk| {
            let mut block = [0u8; BLOCK_SIZE];
            block.copy_from_slice(chunk);
            block
        })
        .collect();

    // PPP_j = AES(K, P_j xor L_j)
    for (block, l) in c.iter_mut().zip(l_table.iter()) {
        xor_into(block, l);
        aes_apply(cipher, block, direction);
    }

    // MP = (xor of PPP_j) xor T
    let mut mp = *tweak;
    for block in &c {
        xor_into(&mut mp, block);
    }

    let mut mc = mp;
    aes_apply(cipher, &mut mc, direction);

    // M = MP xor MC
    let mut mask = mp;
    xor_into(&mut mask, &mc);

    // CCC_j = PPP_j xor 2^(j-1) * M for j >= 2 (1-based)
    for block in c.iter_mut().skip(1) {
        mask = mult_by_two(&mask);
        xor_into(block, &mask);
    }

    // CCC_1 = (xor of CCC_j, j >= 2) xor T xor MC
    let mut ccc1 = mc;
    xor_into(&mut ccc1, tweak);
    for block in c.iter().skip(1) {
        xor_into(&mut ccc1, block);
    }
    c[0] = ccc1;

    // C_j = AES(K, CCC_j) xor L_j
    for (block, l) in c.iter_mut().zip(l_table.iter()) {
        aes_apply(cipher, block, direction);
        xor_into(block, l);
    }

    Ok(c.concat())
}
