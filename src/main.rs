use std::{
    collections::HashMap,
    error::Error,
    io::BufRead,
    path::PathBuf,
    sync::Arc,
    thread,
    time::Duration,
};

use chrono::{NaiveTime, Timelike};
use clap::{Parser, Subcommand};
use crossbeam_channel::{select, Receiver};
use roosty_alarm::{
    communication::{self, Message, MessageType, Sender},
    config::{self, Settings, SharedSettings, Sound},
    notify::{LogNotifier, NotificationAction, NotificationEvent},
    player::{Player, SilentPlayer},
    store::{self, TomlStore},
    Alarm, AlarmServices, DaysOfWeek, WaitHandle, WaitWorker, NO_DEADLINE,
};
use uuid::Uuid;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// write the default settings
    Init {
        #[clap(long, short)]
        force: bool,
    },
    /// set the ringtone new alarms get
    DefaultSound { name: String, path: PathBuf },
    NewAlarm {
        name: String,
        /// HH:MM, 24 hour
        #[clap(value_parser = parse_time)]
        time: NaiveTime,
        /// once, daily, weekdays, weekend or a list like mon,wed,fri
        #[clap(long, short, default_value = "once")]
        days: DaysOfWeek,
        /// ringtone file, defaults to the default sound
        #[clap(long, short)]
        sound: Option<PathBuf>,
        #[clap(long, short, default_value_t = 100)]
        volume: u8,
    },
    List,
    Remove {
        id: Uuid,
    },
    Enable {
        id: Uuid,
    },
    Disable {
        id: Uuid,
    },
    /// ring alarms as they come due, reads `dismiss <id>`, `snooze <id>` or `quit` from stdin
    Watch,
}

fn parse_time(time: &str) -> Result<NaiveTime, chrono::ParseError> {
    NaiveTime::parse_from_str(time, "%H:%M")
}

// TODO: pick the player from the settings once there is more than one real backend
#[cfg(feature = "audio")]
fn new_player() -> Box<dyn Player> {
    match roosty_alarm::player::RodioPlayer::open_default() {
        Ok(player) => Box::new(player),
        Err(e) => {
            log::warn!("no audio output, alarms will be silent: {e}");
            Box::new(SilentPlayer::default())
        }
    }
}

#[cfg(not(feature = "audio"))]
fn new_player() -> Box<dyn Player> {
    Box::new(SilentPlayer::default())
}

fn open_services(
    settings: SharedSettings,
    sender: Option<Sender>,
) -> Result<AlarmServices, Box<dyn Error>> {
    let store = TomlStore::open(config::alarms_path()?)?;
    log::debug!("alarms stored in {}", store.path().display());
    Ok(AlarmServices {
        store: store::shared(store),
        settings,
        notifier: Arc::new(LogNotifier),
        sender,
    })
}

fn find(services: &AlarmServices, id: Uuid) -> Result<Alarm, Box<dyn Error>> {
    Alarm::load_all(services, new_player)
        .into_iter()
        .find(|alarm| alarm.uuid() == id)
        .ok_or_else(|| format!("no alarm with id {id}").into())
}

fn set_enabled(services: &AlarmServices, id: Uuid, enabled: bool) -> Result<(), Box<dyn Error>> {
    let mut alarm = find(services, id)?;
    alarm.set_enabled(enabled);
    alarm.save();
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    // initilize the logger
    simple_file_logger::init_logger!("roosty_alarm").expect("couldn't initialize logger");

    let args = Args::parse();
    let config_path = config::config_path()?;
    if let Command::Init { force } = args.command {
        if force || !config::is_config_present() {
            Settings::new().save(&config_path)?;
            std::fs::create_dir_all(config::sounds_path())?;
            println!("wrote {}", config_path.display());
        } else {
            println!("{} already exists, use --force to overwrite", config_path.display());
        }
        return Ok(());
    }
    let settings = Settings::load_or_default(&config_path)?.shared();

    match args.command {
        Command::Init { .. } => {}
        Command::DefaultSound { name, path } => {
            let mut new_settings = Settings::load_or_default(&config_path)?;
            new_settings.default_sound = Sound::new(name, path);
            new_settings.save(&config_path)?;
        }
        Command::NewAlarm {
            name,
            time,
            days,
            sound,
            volume,
        } => {
            let mut alarm = Alarm::new(
                name,
                time.hour(),
                time.minute(),
                days,
                open_services(settings, None)?,
                new_player(),
            );
            if let Some(path) = sound {
                let name = path
                    .file_stem()
                    .map_or_else(|| "custom".to_string(), |n| n.to_string_lossy().into_owned());
                alarm.set_ringtone(Sound::new(name, path));
            }
            alarm.set_volume(volume);
            alarm.save();
            println!("{}", alarm.uuid());
        }
        Command::List => {
            let services = open_services(settings, None)?;
            for alarm in Alarm::load_all(&services, new_player) {
                let next = alarm
                    .next_ring_time()
                    .and_then(|at| chrono::DateTime::from_timestamp(at, 0))
                    .map_or_else(
                        || "never".to_string(),
                        |at| at.with_timezone(&chrono::Local).format("%a %F %R").to_string(),
                    );
                println!(
                    "{} {:02}:{:02} {:<10} {:<8} {:<20} next: {next}",
                    alarm.uuid(),
                    alarm.hours(),
                    alarm.minutes(),
                    alarm.days_of_week().to_string(),
                    if alarm.enabled() { "on" } else { "off" },
                    alarm.name(),
                );
            }
        }
        Command::Remove { id } => find(&open_services(settings, None)?, id)?.remove(),
        Command::Enable { id } => set_enabled(&open_services(settings, None)?, id, true)?,
        Command::Disable { id } => set_enabled(&open_services(settings, None)?, id, false)?,
        Command::Watch => {
            let (sender, receiver) = communication::channel();
            watch(&open_services(settings, Some(sender.clone()))?, &sender, &receiver)?;
        }
    }
    Ok(())
}

enum Next {
    Message(Message),
    Quit,
    Tick,
}

/// the owner of every alarm while watching: schedules them, rings them and passes on what
/// the user typed
fn watch(
    services: &AlarmServices,
    sender: &Sender,
    receiver: &communication::Receiver,
) -> Result<(), Box<dyn Error>> {
    let mut alarms: HashMap<Uuid, (Alarm, WaitHandle)> = HashMap::new();
    for alarm in Alarm::load_all(services, new_player) {
        let deadline = alarm.next_ring_time().unwrap_or(NO_DEADLINE);
        let wait = WaitWorker::spawn(deadline, alarm.uuid(), sender.clone())?;
        alarms.insert(alarm.uuid(), (alarm, wait));
    }
    log::info!("watching {} alarms", alarms.len());
    let quit = read_commands(sender.clone());

    loop {
        let next = select! {
            recv(receiver) -> message => message.map_or(Next::Quit, Next::Message),
            recv(quit) -> _ => Next::Quit,
            default(Duration::from_millis(500)) => Next::Tick,
        };
        match next {
            Next::Quit => break,
            Next::Tick => {}
            Next::Message(Message { kind, alarm_id }) => {
                let Some((alarm, wait)) = alarms.get_mut(&alarm_id) else {
                    log::debug!("message for unknown alarm {alarm_id}");
                    continue;
                };
                match kind {
                    MessageType::WaitFinished => alarm.ring(),
                    MessageType::AlarmChanged => {
                        wait.set_new_time(alarm.next_ring_time().unwrap_or(NO_DEADLINE));
                    }
                    MessageType::PropertyChanged => log::debug!("alarm {alarm_id} changed"),
                    MessageType::WaitError(e) => log::error!("alarm {alarm_id} can't wait: {e}"),
                    MessageType::Notification(event) => alarm.handle_notification(event),
                }
            }
        }
        for (alarm, _) in alarms.values_mut() {
            if alarm.is_ringing() {
                alarm.poll_playback();
            }
        }
    }
    // dropping the wait handles stops their threads
    drop(alarms);
    Ok(())
}

/// reads commands from stdin on its own thread, the returned channel disconnects on `quit`
/// or end of input
fn read_commands(sender: Sender) -> Receiver<()> {
    let (quit_tx, quit_rx) = crossbeam_channel::bounded::<()>(0);
    thread::spawn(move || {
        let _quit = quit_tx;
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let mut words = line.split_whitespace();
            let event = match words.next() {
                Some("quit" | "q") => break,
                Some("dismiss" | "d") => NotificationEvent::Action(NotificationAction::Dismiss),
                Some("snooze" | "s") => NotificationEvent::Action(NotificationAction::Snooze),
                Some(other) => {
                    eprintln!("unknown command {other}, expected dismiss, snooze or quit");
                    continue;
                }
                None => continue,
            };
            match words.next().map(str::parse::<Uuid>) {
                Some(Ok(id)) => {
                    if sender
                        .send(Message::new(MessageType::Notification(event), id))
                        .is_err()
                    {
                        break;
                    }
                }
                _ => eprintln!("expected an alarm id after the command"),
            }
        }
    });
    quit_rx
}
