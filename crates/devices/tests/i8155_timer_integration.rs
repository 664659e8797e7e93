use mcs85_devices::clock::{Clock, ManualClock};
use mcs85_devices::i8155::{
    I8155, I8155Config, Space, Variant, COMMAND_TM_START, COMMAND_TM_STOP,
    COMMAND_TM_STOP_AFTER_TC, REG_COMMAND, REG_STATUS, REG_TIMER_HIGH, REG_TIMER_LOW,
    STATUS_TIMER, TIMER_MODE_AUTO_RELOAD, TIMER_MODE_MASK, TIMER_MODE_TC_PULSE,
};
use std::cell::RefCell;
use std::rc::Rc;

/// 1 GHz TIMER IN makes one timer clock per nanosecond, so edge timestamps
/// below are in timer clocks.
fn test_chip(clock: &ManualClock) -> I8155<ManualClock> {
    let mut chip = I8155::new(
        clock.clone(),
        I8155Config {
            variant: Variant::I8155,
            clock_hz: 1_000_000_000,
        },
    );
    chip.reset();
    chip
}

type Edges = Rc<RefCell<Vec<(u64, bool)>>>;

fn record_timer_output(chip: &mut I8155<ManualClock>, clock: &ManualClock) -> Edges {
    let edges: Edges = Rc::default();
    let sink = edges.clone();
    let stamp = clock.clone();
    chip.connect_timer_output(move |level| sink.borrow_mut().push((stamp.now_ns(), level)));
    edges
}

/// Advances one timer clock at a time so recorded timestamps are exact.
fn run_to(clock: &ManualClock, chip: &mut I8155<ManualClock>, t_ns: u64) {
    while clock.now_ns() < t_ns {
        clock.advance_ns(1);
        chip.poll();
    }
}

fn program_timer(chip: &mut I8155<ManualClock>, length: u16, mode: u8) {
    chip.io_write(REG_TIMER_LOW, (length & 0xff) as u8);
    chip.io_write(REG_TIMER_HIGH, ((length >> 8) as u8 & 0x3f) | mode);
}

#[test]
fn power_on_reset_drives_to_high() {
    let clock = ManualClock::new();
    let mut chip = I8155::new_default(clock.clone());
    let edges = record_timer_output(&mut chip, &clock);

    chip.reset();
    assert_eq!(*edges.borrow(), vec![(0, true)]);
}

#[test]
fn square_wave_period_matches_the_programmed_length() {
    let clock = ManualClock::new();
    let mut chip = test_chip(&clock);
    let edges = record_timer_output(&mut chip, &clock);

    program_timer(&mut chip, 100, TIMER_MODE_AUTO_RELOAD);
    chip.io_write(REG_COMMAND, COMMAND_TM_START);

    run_to(&clock, &mut chip, 250);
    assert_eq!(
        *edges.borrow(),
        vec![
            (50, false),
            (100, true),
            (150, false),
            (200, true),
            (250, false),
        ]
    );

    // stopping forces the output back high and ends the wave
    chip.io_write(REG_COMMAND, COMMAND_TM_STOP);
    assert_eq!(edges.borrow().last(), Some(&(250, true)));

    run_to(&clock, &mut chip, 500);
    assert_eq!(edges.borrow().len(), 6);
    assert!(!chip.timer_running());
}

#[test]
fn odd_length_square_wave_puts_the_extra_clock_in_the_high_half() {
    let clock = ManualClock::new();
    let mut chip = test_chip(&clock);
    let edges = record_timer_output(&mut chip, &clock);

    program_timer(&mut chip, 9, TIMER_MODE_AUTO_RELOAD);
    chip.io_write(REG_COMMAND, COMMAND_TM_START);

    run_to(&clock, &mut chip, 18);
    assert_eq!(
        *edges.borrow(),
        vec![(5, false), (9, true), (14, false), (18, true)]
    );
}

#[test]
fn single_pulse_mode_pulses_low_at_terminal_count_and_stops() {
    let clock = ManualClock::new();
    let mut chip = test_chip(&clock);
    let edges = record_timer_output(&mut chip, &clock);

    program_timer(&mut chip, 100, TIMER_MODE_TC_PULSE);
    chip.io_write(REG_COMMAND, COMMAND_TM_START);

    run_to(&clock, &mut chip, 300);

    // the low pulse spans the final counted-down step; the stop at terminal
    // count drives the line back high
    assert_eq!(*edges.borrow(), vec![(99, false), (100, true)]);
    assert!(!chip.timer_running());

    // terminal count latched the status flag, which clears on read
    assert_ne!(chip.io_read(REG_STATUS) & STATUS_TIMER, 0);
    assert_eq!(chip.io_read(REG_STATUS) & STATUS_TIMER, 0);
}

#[test]
fn status_peek_does_not_clear_the_terminal_count_flag() {
    let clock = ManualClock::new();
    let mut chip = test_chip(&clock);

    program_timer(&mut chip, 10, TIMER_MODE_TC_PULSE);
    chip.io_write(REG_COMMAND, COMMAND_TM_START);
    run_to(&clock, &mut chip, 20);

    chip.ale_write(Space::Io, REG_STATUS);
    assert_ne!(chip.data_peek() & STATUS_TIMER, 0);
    assert_ne!(chip.data_peek() & STATUS_TIMER, 0);

    // a normal read still observes the flag, then clears it
    assert_ne!(chip.data_read() & STATUS_TIMER, 0);
    assert_eq!(chip.data_read() & STATUS_TIMER, 0);
}

#[test]
fn auto_reload_pulse_mode_repeats_every_period() {
    let clock = ManualClock::new();
    let mut chip = test_chip(&clock);
    let edges = record_timer_output(&mut chip, &clock);

    program_timer(&mut chip, 10, TIMER_MODE_TC_PULSE | TIMER_MODE_AUTO_RELOAD);
    chip.io_write(REG_COMMAND, COMMAND_TM_START);

    run_to(&clock, &mut chip, 35);
    assert_eq!(
        *edges.borrow(),
        vec![
            (9, false),
            (10, true),
            (19, false),
            (20, true),
            (29, false),
            (30, true),
        ]
    );
    assert!(chip.timer_running());
    assert_ne!(chip.io_read(REG_STATUS) & STATUS_TIMER, 0);

    // the flag is latched again at every terminal count
    assert_eq!(chip.io_read(REG_STATUS) & STATUS_TIMER, 0);
    run_to(&clock, &mut chip, 40);
    assert_ne!(chip.io_read(REG_STATUS) & STATUS_TIMER, 0);
}

#[test]
fn square_wave_mode_never_sets_the_terminal_count_flag() {
    let clock = ManualClock::new();
    let mut chip = test_chip(&clock);

    program_timer(&mut chip, 10, TIMER_MODE_AUTO_RELOAD);
    chip.io_write(REG_COMMAND, COMMAND_TM_START);

    run_to(&clock, &mut chip, 55);
    assert_eq!(chip.io_read(REG_STATUS) & STATUS_TIMER, 0);
}

#[test]
fn restart_while_running_takes_effect_at_the_next_terminal_count() {
    let clock = ManualClock::new();
    let mut chip = test_chip(&clock);
    let edges = record_timer_output(&mut chip, &clock);

    program_timer(&mut chip, 100, TIMER_MODE_AUTO_RELOAD);
    chip.io_write(REG_COMMAND, COMMAND_TM_START);

    // reprogram mid-period: the current period must not change
    run_to(&clock, &mut chip, 30);
    program_timer(&mut chip, 6, TIMER_MODE_AUTO_RELOAD);
    chip.io_write(REG_COMMAND, COMMAND_TM_START);

    run_to(&clock, &mut chip, 110);
    assert_eq!(
        *edges.borrow(),
        vec![
            (50, false),
            (100, true),
            (103, false),
            (106, true),
            (109, false),
        ]
    );
}

#[test]
fn stop_after_terminal_count_finishes_the_current_period() {
    let clock = ManualClock::new();
    let mut chip = test_chip(&clock);
    let edges = record_timer_output(&mut chip, &clock);

    program_timer(&mut chip, 10, TIMER_MODE_AUTO_RELOAD);
    chip.io_write(REG_COMMAND, COMMAND_TM_START);

    run_to(&clock, &mut chip, 3);
    chip.io_write(REG_COMMAND, COMMAND_TM_STOP_AFTER_TC);

    run_to(&clock, &mut chip, 30);
    assert_eq!(*edges.borrow(), vec![(5, false), (10, true)]);
    assert!(!chip.timer_running());
}

#[test]
fn live_count_reads_track_the_remaining_clocks() {
    let clock = ManualClock::new();
    let mut chip = test_chip(&clock);

    program_timer(&mut chip, 100, TIMER_MODE_AUTO_RELOAD);
    chip.io_write(REG_COMMAND, COMMAND_TM_START);

    // the counter counts down by twos; the odd-phase flag rides bit 0
    run_to(&clock, &mut chip, 10);
    assert_eq!(chip.io_read(REG_TIMER_LOW), 83);
    assert_eq!(chip.io_read(REG_TIMER_HIGH), TIMER_MODE_AUTO_RELOAD);

    run_to(&clock, &mut chip, 60);
    assert_eq!(chip.io_read(REG_TIMER_LOW), 82);

    // once stopped, reads surface the programmed length again
    chip.io_write(REG_COMMAND, COMMAND_TM_STOP);
    assert_eq!(chip.io_read(REG_TIMER_LOW), 100);
    assert_eq!(
        chip.io_read(REG_TIMER_HIGH) & TIMER_MODE_MASK,
        TIMER_MODE_AUTO_RELOAD
    );
}

#[test]
fn coarse_time_steps_replay_every_intermediate_edge() {
    let clock = ManualClock::new();
    let mut chip = test_chip(&clock);
    let edges = record_timer_output(&mut chip, &clock);

    program_timer(&mut chip, 100, TIMER_MODE_AUTO_RELOAD);
    chip.io_write(REG_COMMAND, COMMAND_TM_START);

    // one giant step across five periods
    clock.advance_ns(500);
    chip.poll();

    let levels: Vec<bool> = edges.borrow().iter().map(|&(_, level)| level).collect();
    assert_eq!(
        levels,
        vec![false, true, false, true, false, true, false, true, false, true]
    );
    assert!(chip.timer_output_level());
}

#[test]
fn minimum_length_square_wave_toggles_every_clock() {
    let clock = ManualClock::new();
    let mut chip = test_chip(&clock);
    let edges = record_timer_output(&mut chip, &clock);

    program_timer(&mut chip, 2, TIMER_MODE_AUTO_RELOAD);
    chip.io_write(REG_COMMAND, COMMAND_TM_START);

    run_to(&clock, &mut chip, 4);
    assert_eq!(
        *edges.borrow(),
        vec![(1, false), (2, true), (3, false), (4, true)]
    );
}
