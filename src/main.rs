//! Bankscope - banked-memory code analysis for C64 / Amstrad CPC / ZX Spectrum
//!
//! Usage:
//!   bankscope --machine spectrum128 --rom ROM0=128-0.rom --rom ROM1=128-1.rom --trace run.trace --listing out.asm
//!   bankscope --machine c64 --load game.prg@0801 --import game.json --export game.json
//!
//! Options:
//!   -m, --machine <NAME>   c64 / cpc464 / cpc6128 / spectrum48 / spectrum128
//!   --rom <BANK=FILE>      バンクにROMイメージを読み込む（複数指定可）
//!   --load <FILE@ADDR>     現在のマッピングでメモリに置く
//!   --trace <FILE>         バストレースを再生
//!   --import / --export    解析ファイル（JSON）
//!   -s, --save             設定の解析ディレクトリに <machine>_analysis.json で保存
//!   --listing <FILE>       アイテムリストをテキストで出力
//!   --log <CATS>           解析ログ（bank+exec+data+break / all / none）

use bankscope::analysis_log;
use bankscope::config::Config;
use bankscope::debugger::Debugger;
use bankscope::listing;
use bankscope::machine::{self, AnalysedMachine, MachineType};
use bankscope::trace;
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};

/// コマンドライン引数
#[derive(Parser, Debug)]
#[command(name = "bankscope")]
#[command(author = "Bankscope Project")]
#[command(version = "0.1.0")]
#[command(about = "Bankscope - banked-memory code analysis", long_about = None)]
struct Args {
    /// マシン（未指定なら設定ファイルの値）
    #[arg(short, long)]
    machine: Option<String>,

    /// ROMイメージ（BANK=FILE）
    #[arg(long = "rom", value_name = "BANK=FILE")]
    roms: Vec<String>,

    /// メモリに置くファイル（FILE@ADDR）
    #[arg(long = "load", value_name = "FILE@ADDR")]
    loads: Vec<String>,

    /// 再生するバストレース
    #[arg(short, long)]
    trace: Option<String>,

    /// 読み込む解析ファイル
    #[arg(short, long)]
    import: Option<String>,

    /// 書き出す解析ファイル
    #[arg(short, long)]
    export: Option<String>,

    /// 解析ディレクトリにマシン名で保存
    #[arg(short, long)]
    save: bool,

    /// リスティングの出力先（"-" で標準出力）
    #[arg(short, long)]
    listing: Option<String>,

    /// 実行ブレークポイント（複数指定可）
    #[arg(long = "break", value_name = "ADDR")]
    breaks: Vec<String>,

    /// 設定ファイル
    #[arg(long)]
    config: Option<String>,

    /// ホームディレクトリ（相対パスの基準）
    #[arg(long)]
    home: Option<String>,

    /// 解析ログカテゴリ
    #[arg(long, default_value = "none")]
    log: String,

    /// 命令トレースを記録して最後に表示
    #[arg(long)]
    trace_log: bool,
}

/// 相対パスなら設定のディレクトリから探す
fn find_file(config: &Config, dir: &Path, name: &str) -> PathBuf {
    let path = PathBuf::from(name);
    if path.exists() || path.is_absolute() {
        path
    } else if dir.join(name).exists() {
        dir.join(name)
    } else {
        config.resolve_path(name)
    }
}

fn load_roms(config: &Config, emu: &mut dyn AnalysedMachine, roms: &[String]) -> Result<(), String> {
    for arg in roms {
        let (bank, file) = arg
            .split_once('=')
            .ok_or_else(|| format!("Invalid --rom '{}', expected BANK=FILE", arg))?;
        let path = find_file(config, &config.rom_dir_path(), file);
        let data = fs::read(&path).map_err(|e| format!("Failed to read ROM {:?}: {}", path, e))?;
        emu.load_rom(bank, &data).map_err(|e| e.to_string())?;
    }
    Ok(())
}

fn load_files(emu: &mut dyn AnalysedMachine, loads: &[String]) -> Result<(), String> {
    for arg in loads {
        let (file, addr) = arg
            .rsplit_once('@')
            .ok_or_else(|| format!("Invalid --load '{}', expected FILE@ADDR", arg))?;
        let addr = trace::parse_hex(addr).ok_or_else(|| format!("Invalid address in --load '{}'", arg))?;
        let data = fs::read(file).map_err(|e| format!("Failed to read {}: {}", file, e))?;
        if addr as usize + data.len() > 0x10000 {
            return Err(format!("{} does not fit at ${:04X}", file, addr));
        }
        emu.load_memory(addr, &data);
        log::info!("Loaded {} ({} bytes) at ${:04X}", file, data.len(), addr);
    }
    Ok(())
}

fn run(args: Args, mut config: Config, config_path: PathBuf) -> Result<(), String> {
    let machine_type: MachineType = match args.machine.as_deref() {
        Some(name) => name.parse()?,
        None => config.machine_type()?,
    };

    println!("Bankscope v0.1 ({})", machine_type);

    let mut emu = machine::create(machine_type);
    emu.analysis_mut().set_auto_label_jumps(config.auto_label_jumps);

    load_roms(&config, emu.as_mut(), &args.roms)?;
    load_files(emu.as_mut(), &args.loads)?;

    if let Some(ref path) = args.import {
        let path = find_file(&config, &config.analysis_dir_path(), path);
        emu.analysis_mut().load_analysis(&path).map_err(|e| e.to_string())?;
        log::info!("Imported analysis from {:?}", path);
    }

    for addr in &args.breaks {
        let addr = trace::parse_hex(addr).ok_or_else(|| format!("Invalid breakpoint address '{}'", addr))?;
        emu.analysis_mut().toggle_exec_breakpoint_at_address(addr);
    }

    let mut debugger = Debugger::new();
    debugger.trace_enabled = args.trace_log;

    if let Some(ref path) = args.trace {
        let text = fs::read_to_string(path).map_err(|e| format!("Failed to read trace {}: {}", path, e))?;
        let events = trace::parse_trace(&text)?;
        let summary = trace::replay(emu.as_mut(), &events, &mut debugger);
        println!(
            "Replayed {} instructions over {} frames",
            summary.instructions, summary.frames
        );
        for (trap_id, pc) in &summary.breaks {
            println!(
                "  break (trap {}) at {}",
                trap_id,
                emu.analysis().address_label_string_for_cpu(*pc)
            );
        }
        if args.trace_log {
            for line in debugger.get_trace(32) {
                println!("  {}", line);
            }
        }
    }

    let state = emu.analysis_mut();
    let fixed = state.fixup_address_refs();
    if fixed > 0 {
        log::debug!("Fixed up {} address references", fixed);
    }
    state.update_item_list();

    if let Some(ref path) = args.listing {
        let text = listing::write_listing(emu.analysis());
        if path == "-" {
            print!("{}", text);
        } else {
            fs::write(path, text).map_err(|e| format!("Failed to write listing {}: {}", path, e))?;
            log::info!("Wrote listing to {}", path);
        }
    }

    if let Some(ref path) = args.export {
        emu.analysis()
            .save_analysis(path, machine_type.name())
            .map_err(|e| e.to_string())?;
        println!("Exported analysis to {}", path);
        config.last_analysis = Some(path.clone());
    }

    if args.save {
        config.ensure_analysis_dir()?;
        let path = config.analysis_path(machine_type);
        emu.analysis()
            .save_analysis(&path, machine_type.name())
            .map_err(|e| e.to_string())?;
        println!("Saved analysis to {}", path.display());
        config.last_analysis = Some(path.to_string_lossy().into_owned());
    }

    let state = emu.analysis();
    println!(
        "{} labels, {} items in listing",
        state.label_count(),
        state.item_list().len()
    );

    config.machine = machine_type.name().to_string();
    if let Some(rom) = args.roms.last() {
        config.last_rom = Some(rom.clone());
    }
    if let Err(e) = config.save_to(&config_path) {
        log::warn!("{}", e);
    }
    Ok(())
}

fn main() {
    let args = Args::parse();
    let (config, config_path) = Config::load_with_options(args.config.as_deref(), args.home.as_deref());

    // RUST_LOG が無ければ設定ファイルのレベル
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_level.as_str())).init();

    // 解析ログカテゴリを設定
    analysis_log::set_log_level(analysis_log::parse_log_level(&args.log));

    if let Err(e) = run(args, config, config_path) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
