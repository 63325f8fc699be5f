pub mod pillars;
