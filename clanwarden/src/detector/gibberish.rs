// clanwarden/src/detector/gibberish.rs
//
// Keyboard-mash check: flags a single message whose longest run of
// consecutive consonants exceeds a configured length ("sdfghjkl").
// Independent of windowing; Latin and Cyrillic alphabets.

const CONSONANTS: &str = "bcdfghjklmnpqrstvwxzбвгджзйклмнпрстфхцчшщ";

fn is_consonant(c: char) -> bool {
    c.to_lowercase().all(|l| CONSONANTS.contains(l))
}

pub fn longest_consonant_run(message: &str) -> usize {
    let mut best = 0;
    let mut run = 0;
    for c in message.chars() {
        if is_consonant(c) {
            run += 1;
            best = best.max(run);
        } else {
            run = 0;
        }
    }
    best
}
