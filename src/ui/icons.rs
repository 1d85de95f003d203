//! Shared UI icons, with plain-text fallbacks for terminals without emoji.

use console::Emoji;

// Step outcome
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[KO]");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "[--]");

// Stages
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "[>]");
pub static REPORT: Emoji<'_, '_> = Emoji("📊 ", "[R]");
