//! The heap and its collection driver.
use std::time::{Duration, Instant};

use crate::collector::{CollectionOutcome, Collector};
use crate::control::ControlBlock;
use crate::error::{fatal, HeapError};
use crate::globals::*;
use crate::page::{collection_id_to_gen, Generation};
use crate::segment::Segments;
use crate::statistics::{formatted_size, HeapStatistics};
use crate::value::Value;
use crate::Config;

pub struct Heap {
    pub(crate) segments: Segments,
    pub(crate) pcb: ControlBlock,
    pub(crate) stats: HeapStatistics,
    pub(crate) config: Config,
}

impl Heap {
    pub fn new(config: Config) -> Result<Box<Self>, HeapError> {
        let mut segments = Segments::new(config.reservation, config.executable_code)?;
        let pcb = ControlBlock::new(&mut segments, config.nursery_size)?;
        let mut this = Box::new(Self {
            segments,
            pcb,
            stats: HeapStatistics::default(),
            config,
        });
        this.update_statistics();
        Ok(this)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn control(&self) -> &ControlBlock {
        &self.pcb
    }

    pub fn control_mut(&mut self) -> &mut ControlBlock {
        &mut self.pcb
    }

    pub fn segments(&self) -> &Segments {
        &self.segments
    }

    pub fn statistics(&self) -> &HeapStatistics {
        &self.stats
    }

    /// Generation of the object `value` refers to, `None` for non-pointers.
    pub fn generation_of(&self, value: Value) -> Option<Generation> {
        if !value.is_pointer() {
            return None;
        }
        self.segments
            .info_of(value.address())
            .filter(|info| !info.is_hole())
            .map(|info| info.generation())
    }

    /// Collects on the mutator's behalf and returns with at least `request`
    /// bytes free in the nursery. The generation to collect follows the
    /// running collection counter.
    pub fn collect(&mut self, request: usize) -> &mut ControlBlock {
        let target = collection_id_to_gen(self.pcb.collection_id);
        self.pcb.collection_id += 1;
        self.collect_generation(request, target)
    }

    pub fn collect_generation(&mut self, request: usize, target: Generation) -> &mut ControlBlock {
        let (user_before, system_before) = resource_usage();
        let start = Instant::now();
        log::debug!(
            "collect entry {} free={} (collect gen={:?}/id={})",
            request,
            self.pcb.free_space(),
            target,
            self.pcb.collection_id
        );
        let mapped_before = self.segments.mapped_pages();

        let pcb = &mut self.pcb;
        let mut gc = Collector::new(&mut self.segments, target);
        gc.scan_dirty_pages();
        if pcb.frame_base != 0 {
            gc.collect_stack(pcb.frame_pointer, pcb.frame_base - WORD_SIZE);
        }
        pcb.next_k = gc.trace(pcb.next_k);
        pcb.symbol_table = gc.trace(pcb.symbol_table);
        pcb.arg_list = gc.trace(pcb.arg_list);
        gc.collect_loop();
        gc.fix_weak_pointers();
        gc.deallocate_unused_pages();
        gc.fix_new_pages();
        let CollectionOutcome { tconcs, counters } = gc.finish();

        pcb.reset_after_collection();
        let retired = pcb.release_retired(&mut self.segments);
        let required = request + tconcs.len() * PAIR_SIZE;
        if pcb.free_space() <= required {
            if let Err(e) = pcb.resize_nursery(&mut self.segments, required) {
                fatal(e.into());
            }
        }
        tconcs.flush(pcb, &mut self.segments);

        let (user_after, system_after) = resource_usage();
        pcb.collect_utime += user_after.saturating_sub(user_before);
        pcb.collect_stime += system_after.saturating_sub(system_before);
        self.stats.record(target, counters);
        self.update_statistics();

        log::debug!(
            "collect done: {} objects promoted, {} pages freed, {} retired nursery regions released",
            counters.objects(),
            counters.pages_freed,
            retired
        );
        if self.config.verbose {
            eprintln!(
                "[gc] GC({}) Pause {:?} Promoted {} ({}) Pages {}->{} Free {} {:.4}ms",
                self.stats.total_collections(),
                target,
                counters.objects(),
                formatted_size(counters.bytes_promoted),
                mapped_before,
                self.segments.mapped_pages(),
                formatted_size(self.pcb.free_space()),
                start.elapsed().as_micros() as f64 / 1000.0
            );
        }
        &mut self.pcb
    }

    fn update_statistics(&mut self) {
        self.stats.mapped_pages = self.segments.mapped_pages();
        self.stats.nursery_size = self.pcb.allocation_redline - self.pcb.heap_base;
        self.stats.user_time = self.pcb.collect_utime;
        self.stats.system_time = self.pcb.collect_stime;
    }
}

fn resource_usage() -> (Duration, Duration) {
    fn duration(tv: libc::timeval) -> Duration {
        Duration::new(tv.tv_sec as u64, tv.tv_usec as u32 * 1000)
    }
    unsafe {
        let mut usage: libc::rusage = std::mem::zeroed();
        libc::getrusage(libc::RUSAGE_SELF, &mut usage);
        (duration(usage.ru_utime), duration(usage.ru_stime))
    }
}
