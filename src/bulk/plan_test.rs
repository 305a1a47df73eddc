use super::*;

const GIB: usize = 1024 * 1024 * 1024;
const MIB: usize = 1024 * 1024;

#[test]
fn test_plan_roomy() {
    // 8 GiB, 20 indexes, 4 workers -> 160 buffers.
    let plan = plan_phase1(8 * GIB, 20, 4).unwrap();
    assert_eq!(plan.buffers, 160);
    assert_eq!(plan.store_cache, 128 * MIB);
    assert_eq!(plan.log_buffer, 100 * MIB);

    let share = (8 * GIB) as f64 * 0.45;
    let want = (share as usize - 228 * MIB) / 160;
    assert_eq!(plan.buf_size, want);
    assert!(plan.buf_size >= MIN_BUFFER_SIZE && plan.buf_size <= MAX_BUFFER_SIZE);
}

#[test]
fn test_plan_buffer_ceiling() {
    // tiny fan-out, huge memory: the ceiling clamps.
    let plan = plan_phase1(64 * GIB, 1, 1).unwrap();
    assert_eq!(plan.buffers, 2);
    assert_eq!(plan.buf_size, MAX_BUFFER_SIZE);
}

#[test]
fn test_plan_fallback() {
    // 512 MiB with a wide fan-out: the full caches would starve the
    // buffers, the fallback shrinks the store cache and drops the log
    // buffer.
    let plan = plan_phase1(512 * MIB, 50, 8).unwrap();
    assert_eq!(plan.store_cache, FALLBACK_STORE_CACHE);
    assert_eq!(plan.log_buffer, 0);
    assert!(plan.buf_size >= MIN_BUFFER_SIZE);

    // even the fallback cannot satisfy this one; floor and warn.
    let plan = plan_phase1(64 * MIB, 100, 16).unwrap();
    assert_eq!(plan.buf_size, MIN_BUFFER_SIZE);
}

#[test]
fn test_plan_min_memory() {
    assert!(plan_phase1(MIN_AVAIL_MEMORY - 1, 4, 2).is_err());
    assert!(plan_phase1(MIN_AVAIL_MEMORY, 1, 1).is_ok());
}

#[test]
fn test_plan_phase2() {
    // equal split of the 50% share.
    assert_eq!(plan_phase2(2 * GIB, 256, 16 * MIB, None), GIB / 256);
    // capped at the phase-1 buffer size.
    assert_eq!(plan_phase2(2 * GIB, 4, MIB, None), MIB);
    // floored at 4KiB.
    assert_eq!(plan_phase2(64 * MIB, 100_000, MIB, None), MIN_READ_AHEAD);
    // a direct-buffer slab replaces the share.
    assert_eq!(plan_phase2(2 * GIB, 16, 16 * MIB, Some(64 * MIB)), 4 * MIB);
}
