//! Same-frame contact identity de-duplication.
//!
//! The first contact (in slot order) to claim an identity keeps it. Any later
//! contact in the same frame that collides is moved to the lowest identity
//! not yet used in the frame. There is no negotiation across frames.

use super::frame::Frame;

/// Small bitset over the full `u8` identity space
#[derive(Debug, Default, Clone, Copy)]
struct IdSet([u64; 4]);

impl IdSet {
    fn contains(&self, id: u8) -> bool {
        let (word, bit) = (id as usize / 64, id as usize % 64);
        self.0[word] & (1 << bit) != 0
    }

    fn insert(&mut self, id: u8) {
        let (word, bit) = (id as usize / 64, id as usize % 64);
        self.0[word] |= 1 << bit;
    }

    fn lowest_free(&self) -> Option<u8> {
        (0..=u8::MAX).find(|id| !self.contains(*id))
    }
}

/// Assign stable, pairwise distinct identities to every contact in the frame.
/// Returns the number of contacts that had to be re-assigned.
pub fn stabilize(frame: &mut Frame) -> usize {
    // Reserve every first-claimed candidate up front so a re-assigned contact
    // never steals an id a later slot legitimately owns.
    let mut claimed = IdSet::default();
    let mut keeps = [false; super::frame::MAX_CONTACTS];
    for (idx, contact) in frame.contacts().iter().enumerate() {
        if !claimed.contains(contact.id) {
            claimed.insert(contact.id);
            keeps[idx] = true;
        }
    }

    let mut reassigned = 0;
    for (idx, contact) in frame.contacts_mut().iter_mut().enumerate() {
        if keeps[idx] {
            continue;
        }
        // A frame holds at most five contacts, so a free id always exists
        let Some(id) = claimed.lowest_free() else {
            continue;
        };
        log::trace!("Contact id {} collided in frame, reassigned to {id}", contact.id);
        claimed.insert(id);
        contact.id = id;
        reassigned += 1;
    }

    reassigned
}
