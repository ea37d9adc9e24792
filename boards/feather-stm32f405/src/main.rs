#![deny(unsafe_code)]
#![no_main]
#![no_std]

use broker_session::Link;
use defmt_rtt as _; // global logger
use panic_probe as _;
use rtic::app;
use rtic_monotonics::stm32::prelude::*;

mod device_id;
mod eth;
mod net_buffers;
mod network;

stm32_tim2_monotonic!(Mono, 1_000_000);

/// Shared between the supervisor, the network driver and application tasks
static LINK: Link = Link::new();

#[app(device = embassy_stm32, peripherals = true, dispatchers = [USART1, USART2, USART3])]
mod app {
    use super::*;
    use core::fmt::Write as _;

    use broker_session::{topic, Supervisor};
    use defmt::{debug, error, info, warn};
    use embassy_futures::join::{join, join3};
    use embassy_futures::select::{select, Either};
    use embassy_stm32::exti::ExtiInput;
    use embassy_stm32::gpio::{Level, Output, Pull, Speed};
    use embassy_stm32::peripherals;
    use embassy_stm32::rcc::Hse;
    use embassy_stm32::rcc::HseMode;
    use embassy_stm32::spi::{self, Spi};
    use embassy_stm32::time::Hertz;
    use hal_abstractions::QoS;
    use heapless::String;

    use network::config::{self as net_config, NetworkConfig};
    use network::{EmbeddedTls, MqttEngine, NetTransport};

    type SpiPeripheral = embassy_stm32::Peri<'static, peripherals::SPI2>;
    type PinPB13 = embassy_stm32::Peri<'static, peripherals::PB13>;
    type PinPB15 = embassy_stm32::Peri<'static, peripherals::PB15>;
    type PinPB14 = embassy_stm32::Peri<'static, peripherals::PB14>;
    type PinPC6 = embassy_stm32::Peri<'static, peripherals::PC6>;
    type PinPC3 = embassy_stm32::Peri<'static, peripherals::PC3>;
    type PinPC2 = embassy_stm32::Peri<'static, peripherals::PC2>;
    type ExtiChannel = embassy_stm32::Peri<'static, peripherals::EXTI2>;
    type DmaTx = embassy_stm32::Peri<'static, peripherals::DMA1_CH4>;
    type DmaRx = embassy_stm32::Peri<'static, peripherals::DMA1_CH3>;

    struct NetworkPeripherals {
        spi: SpiPeripheral,
        sck: PinPB13,
        mosi: PinPB15,
        miso: PinPB14,
        cs: PinPC6,
        reset: PinPC3,
        int: PinPC2,
        exti: ExtiChannel,
        dma_tx: DmaTx,
        dma_rx: DmaRx,
    }

    // RNG interrupt binding for hardware random number generator
    embassy_stm32::bind_interrupts!(struct RngIrqs {
        RNG => embassy_stm32::rng::InterruptHandler<peripherals::RNG>;
    });

    #[shared]
    struct Shared {}

    #[local]
    struct Local {
        led: Output<'static>,
    }

    #[init]
    fn init(_cx: init::Context) -> (Shared, Local) {
        info!("IoT Playground starting...");

        // Adafruit Feather STM32F405: 12 MHz HSE
        let mut config = embassy_stm32::Config::default();
        config.rcc.hse = Some(Hse {
            freq: Hertz(12_000_000),
            mode: HseMode::Oscillator,
        });

        // HSE (12 MHz) / PREDIV(6) = 2 MHz (PLL input)
        // 2 MHz * MUL(168) = 336 MHz (VCO)
        // VCO / DIVP(4) = 84 MHz (SYSCLK)
        // VCO / DIVQ(7) = 48 MHz (RNG clock)
        config.rcc.pll_src = embassy_stm32::rcc::PllSource::HSE;
        config.rcc.pll = Some(embassy_stm32::rcc::Pll {
            prediv: embassy_stm32::rcc::PllPreDiv::DIV6,
            mul: embassy_stm32::rcc::PllMul::MUL168,
            divp: Some(embassy_stm32::rcc::PllPDiv::DIV4),
            divq: Some(embassy_stm32::rcc::PllQDiv::DIV7),
            divr: None,
        });
        config.rcc.sys = embassy_stm32::rcc::Sysclk::PLL1_P;
        config.rcc.ahb_pre = embassy_stm32::rcc::AHBPrescaler::DIV1; // 84 MHz
        config.rcc.apb1_pre = embassy_stm32::rcc::APBPrescaler::DIV2; // 42 MHz
        config.rcc.apb2_pre = embassy_stm32::rcc::APBPrescaler::DIV1; // 84 MHz

        let p = embassy_stm32::init(config);
        info!("PLL configured: SYSCLK=84MHz, PLLQ=48MHz for RNG");

        // TIM2 on APB1: timer clock = 2*APB1 when prescaler != 1
        Mono::start(84_000_000);

        let client_id = device_id::client_id();
        info!("Client ID: {}", client_id);

        let led = Output::new(p.PC1, Level::High, Speed::Low);

        let net_periph = NetworkPeripherals {
            spi: p.SPI2,
            sck: p.PB13,
            mosi: p.PB15,
            miso: p.PB14,
            cs: p.PC6,
            reset: p.PC3,
            int: p.PC2,
            exti: p.EXTI2,
            dma_tx: p.DMA1_CH4,
            dma_rx: p.DMA1_CH3,
        };

        heartbeat::spawn().ok();
        network_task::spawn(net_periph, p.RNG, client_id).ok();
        status::spawn(client_id).ok();

        (Shared {}, Local { led })
    }

    /// Heartbeat task
    #[task(priority = 1, local = [led])]
    async fn heartbeat(cx: heartbeat::Context) {
        loop {
            cx.local.led.set_high();
            Mono::delay(100.millis()).await;
            cx.local.led.set_low();
            Mono::delay(4900.millis()).await;
        }
    }

    /// Network task: W5500, embassy-net and the session supervisor
    ///
    /// Stack is !Send and must remain within this task.
    #[task(priority = 1)]
    async fn network_task(
        _cx: network_task::Context,
        periph: NetworkPeripherals,
        rng_periph: embassy_stm32::Peri<'static, peripherals::RNG>,
        client_id: &'static str,
    ) {
        use embassy_net::{Config, StackResources};
        use embassy_stm32::rng::Rng;
        use static_cell::StaticCell;

        let mut spi_config = spi::Config::default();
        spi_config.frequency = Hertz(10_000_000); // 10 MHz for W5500

        let spi = Spi::new(
            periph.spi,
            periph.sck,
            periph.mosi,
            periph.miso,
            periph.dma_tx,
            periph.dma_rx,
            spi_config,
        );

        let eth_periph = eth::EthPeripherals {
            spi,
            cs: Output::new(periph.cs, Level::High, Speed::VeryHigh),
            reset: Output::new(periph.reset, Level::High, Speed::Low),
            int: ExtiInput::new(periph.int, periph.exti, Pull::Up),
        };

        let net_config = NetworkConfig::default();
        let Ok((device, w5500_runner)) = eth::init_w5500(eth_periph, net_config.mac_addr).await
        else {
            error!("Ethernet unavailable; network task stopped");
            return;
        };

        static RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();
        let (stack, mut net_runner) = embassy_net::new(
            device,
            Config::dhcpv4(Default::default()),
            RESOURCES.init(StackResources::new()),
            net_config.seed,
        );
        info!("Network stack initialized with DHCP");

        let mut supervisor = match Supervisor::new(
            net_config::supervisor_config(client_id),
            &LINK,
            NetTransport::new(stack),
            EmbeddedTls::new(Rng::new(rng_periph, RngIrqs)),
            MqttEngine::new(),
            net_config::credentials(),
            embassy_time::Delay,
        ) {
            Ok(supervisor) => supervisor,
            Err(e) => {
                error!("Invalid supervisor configuration: {}", e);
                return;
            }
        };

        let session = async {
            network::wait_for_config(&stack).await;
            let maintain = async {
                loop {
                    match supervisor.run().await {
                        Ok(()) => {
                            info!("Supervisor stopped");
                            return;
                        }
                        Err(degraded) => {
                            error!("Session degraded: {}", degraded);
                            Mono::delay(net_config::DEGRADED_COOLDOWN_MINS.minutes()).await;
                            info!("Restarting degraded session");
                        }
                    }
                }
            };
            join(network::watch_link(&stack, &LINK), maintain).await;
        };

        join3(w5500_runner.run(), net_runner.run(), session).await;
    }

    /// Publishes device status and logs inbound messages
    #[task(priority = 1)]
    async fn status(_cx: status::Context, client_id: &'static str) {
        let status_topic = match topic::format_topic(client_id, "status") {
            Ok(t) => t,
            Err(e) => {
                error!("Cannot build status topic: {}", e);
                return;
            }
        };

        let mut msg_id: u32 = 0;
        let mut next = Mono::now() + net_config::STATUS_INTERVAL_SECS.secs();
        loop {
            match select(Mono::delay_until(next), LINK.next_message()).await {
                Either::First(()) => {
                    next += net_config::STATUS_INTERVAL_SECS.secs();
                    let state = LINK.state();
                    if !state.accepts_requests() {
                        debug!("Skipping status while {}", state);
                        continue;
                    }

                    msg_id = msg_id.wrapping_add(1);
                    let uptime = Mono::now().duration_since_epoch().to_secs();
                    let mut payload: String<64> = String::new();
                    if write!(payload, "{{\"msg_id\":{},\"uptime\":{}}}", msg_id, uptime).is_err() {
                        warn!("Status payload overflow");
                        continue;
                    }

                    match LINK.publish(&status_topic, payload.as_bytes(), QoS::AtLeastOnce) {
                        Ok(()) => info!("Status #{} queued for '{}'", msg_id, status_topic.as_str()),
                        Err(e) => warn!("Status #{} not sent: {}", msg_id, e),
                    }
                }
                Either::Second(message) => info!(
                    "Message on '{}' ({} bytes)",
                    message.topic.as_str(),
                    message.payload.len()
                ),
            }
        }
    }

    /// RTIC idle task - WFI sleep mode when no tasks active
    #[idle]
    fn idle(_cx: idle::Context) -> ! {
        loop {
            cortex_m::asm::wfi();
        }
    }
}
